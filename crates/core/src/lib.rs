//! `cardrecon-core`: settlement domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! partner identities, result codes returned by partner calls, and the
//! credit-status lifecycle of a redeemed deal.

pub mod credit_status;
pub mod error;
pub mod id;
pub mod partner;
pub mod result_code;

pub use credit_status::CreditStatus;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, RedeemedDealId};
pub use partner::Partner;
pub use result_code::ResultCode;
