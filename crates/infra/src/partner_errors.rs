//! Partner response-code table.
//!
//! Maps each partner's native response codes onto [`ResultCode`]. The table
//! is versioned data: operators ship a new JSON document when a partner adds
//! a code, and "already issued" style answers are recognised by code, never
//! by message text.

use serde::{Deserialize, Serialize};
use tracing::warn;

use cardrecon_core::{Partner, ResultCode};

/// One `(partner, native code) -> outcome` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerErrorMapping {
    pub partner: Partner,
    pub partner_code: String,
    pub outcome: ResultCode,
}

impl PartnerErrorMapping {
    fn new(partner: Partner, partner_code: &str, outcome: ResultCode) -> Self {
        Self {
            partner,
            partner_code: partner_code.to_string(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerErrorTable {
    pub version: u32,
    pub entries: Vec<PartnerErrorMapping>,
}

impl PartnerErrorTable {
    /// Codes known at release time.
    pub fn built_in() -> Self {
        use Partner::*;
        use PartnerErrorMapping as M;
        use ResultCode::*;

        Self {
            version: 1,
            entries: vec![
                M::new(A, "00", Success),
                M::new(A, "05", PartnerRejected),
                M::new(A, "14", InvalidParameter),
                M::new(A, "91", PartnerUnavailable),
                M::new(A, "DP", DuplicateTransaction),
                M::new(B, "00", Success),
                M::new(B, "10", PartnerRejected),
                M::new(B, "12", InvalidParameter),
                M::new(B, "25", TransactionNotFound),
                M::new(B, "68", Timeout),
                M::new(C, "0000", Success),
                M::new(C, "AI", DuplicateTransaction),
                M::new(C, "R001", PartnerRejected),
                M::new(C, "E401", Unauthorized),
                M::new(C, "E404", TransactionNotFound),
                M::new(C, "E500", PartnerUnavailable),
                M::new(D, "OK", Success),
                M::new(D, "DUP", DuplicateTransaction),
                M::new(D, "REJ", PartnerRejected),
                M::new(D, "TMO", Timeout),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Exact lookup; codes are compared after trimming blank padding.
    pub fn resolve(&self, partner: Partner, partner_code: &str) -> Option<ResultCode> {
        let code = partner_code.trim();
        self.entries
            .iter()
            .find(|m| m.partner == partner && m.partner_code == code)
            .map(|m| m.outcome)
    }

    /// Like [`resolve`](Self::resolve), with unmapped codes as `UnknownError`.
    pub fn classify(&self, partner: Partner, partner_code: &str) -> ResultCode {
        self.resolve(partner, partner_code).unwrap_or_else(|| {
            warn!(
                partner = %partner,
                partner_code,
                table_version = self.version,
                "unmapped partner response code"
            );
            ResultCode::UnknownError
        })
    }
}

impl Default for PartnerErrorTable {
    fn default() -> Self {
        Self::built_in()
    }
}
