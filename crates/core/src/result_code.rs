//! Closed set of outcomes returned by partner calls and downstream operations.

use serde::{Deserialize, Serialize};

/// Canonical result of a partner invocation or data-access operation.
///
/// Partner-native error codes are mapped onto this enum before any business
/// logic looks at them, so retry and credit-status decisions only ever match
/// on these variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    Created,
    /// The partner accepted the request for asynchronous processing.
    JobQueued,
    /// The partner (or store) already has this transaction.
    DuplicateTransaction,
    UnknownError,
    Unauthorized,
    InvalidParameter,
    TransactionNotFound,
    /// A definitive business rejection from the partner.
    PartnerRejected,
    PartnerUnavailable,
    Timeout,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success | ResultCode::Created)
    }
}

impl core::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}
