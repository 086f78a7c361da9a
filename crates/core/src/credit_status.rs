//! Credit-status lifecycle of a redeemed deal.
//!
//! ```text
//! AuthorizationReceived -> ClearingReceived -> SendingStatementCreditRequest
//!     -> StatementCreditRequested -> CreditGranted | RejectedByPartner
//!                      \-> StatementCreditFailed -> SendingStatementCreditRequest (retry)
//! ```
//!
//! Transitions only move forward (declaration order) with one exception: a
//! failed credit request may be re-sent. Terminal states never move.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    AuthorizationReceived,
    ClearingReceived,
    SendingStatementCreditRequest,
    StatementCreditRequested,
    StatementCreditFailed,
    CreditGranted,
    RejectedByPartner,
}

impl CreditStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreditStatus::CreditGranted | CreditStatus::RejectedByPartner)
    }

    /// Whether `next` is a legal move from `self`.
    ///
    /// Staying in the same state is not a transition.
    pub fn can_advance_to(&self, next: CreditStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (CreditStatus::StatementCreditFailed, CreditStatus::SendingStatementCreditRequest) => {
                true
            }
            _ => next > *self,
        }
    }

    /// Validate and perform a transition.
    pub fn advance(self, next: CreditStatus) -> DomainResult<CreditStatus> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition { from: self, to: next })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_moves_forward() {
        let s = CreditStatus::AuthorizationReceived
            .advance(CreditStatus::ClearingReceived)
            .and_then(|s| s.advance(CreditStatus::SendingStatementCreditRequest))
            .and_then(|s| s.advance(CreditStatus::StatementCreditRequested))
            .and_then(|s| s.advance(CreditStatus::CreditGranted))
            .unwrap();
        assert_eq!(s, CreditStatus::CreditGranted);
    }

    #[test]
    fn terminal_states_never_move() {
        for next in [
            CreditStatus::AuthorizationReceived,
            CreditStatus::StatementCreditFailed,
            CreditStatus::RejectedByPartner,
            CreditStatus::CreditGranted,
        ] {
            assert!(!CreditStatus::CreditGranted.can_advance_to(next));
            assert!(!CreditStatus::RejectedByPartner.can_advance_to(next));
        }
    }

    #[test]
    fn failed_request_can_be_resent() {
        assert!(
            CreditStatus::StatementCreditFailed
                .can_advance_to(CreditStatus::SendingStatementCreditRequest)
        );
        assert!(
            !CreditStatus::StatementCreditRequested
                .can_advance_to(CreditStatus::SendingStatementCreditRequest)
        );
    }

    #[test]
    fn regression_is_an_error() {
        let err = CreditStatus::StatementCreditRequested
            .advance(CreditStatus::ClearingReceived)
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: CreditStatus::StatementCreditRequested,
                to: CreditStatus::ClearingReceived,
            }
        );
    }
}
