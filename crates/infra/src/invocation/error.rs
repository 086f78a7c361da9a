//! Partner call failures and invocation outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cardrecon_core::Partner;

/// A failed partner call: transport error, timeout or error response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{partner} call failed (status {status:?}, code {code:?}): {message}")]
pub struct PartnerCallError {
    pub partner: Partner,
    /// HTTP status, when the partner answered.
    pub status: Option<u16>,
    /// Partner-specific error code from the response body.
    pub code: Option<String>,
    pub message: String,
}

impl PartnerCallError {
    pub fn transport(partner: Partner, message: impl Into<String>) -> Self {
        Self {
            partner,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn response(
        partner: Partner,
        status: u16,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            partner,
            status: Some(status),
            code: code.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Invocation gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("partner call failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: PartnerCallError,
    },
    #[error("invocation cancelled by shutdown after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// A failure signature that is expected and retried without a warning.
///
/// `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenignFailure {
    pub partner: Partner,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl BenignFailure {
    pub fn matches(&self, err: &PartnerCallError) -> bool {
        self.partner == err.partner
            && self.status.is_none_or(|s| err.status == Some(s))
            && self.code.as_ref().is_none_or(|c| err.code.as_ref() == Some(c))
    }
}

/// Partner B rejects requests signed a few seconds ahead of its clock; the
/// next attempt goes through.
pub fn default_benign_failures() -> Vec<BenignFailure> {
    vec![BenignFailure {
        partner: Partner::B,
        status: Some(400),
        code: Some("CLOCK_SKEW".to_string()),
    }]
}
