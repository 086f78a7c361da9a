//! Infrastructure layer: partner invocation, data access, reconciliation,
//! settlement jobs and the scheduled job executor.

pub mod config;
pub mod invocation;
pub mod jobs;
pub mod partner_errors;
pub mod reconcile;
pub mod settlement;
pub mod shutdown;
pub mod store;


pub use config::{ConfigError, SettlementConfig};
pub use invocation::{InvocationEngine, InvocationError, PartnerCallError, RetryMode, RetryPolicy};
pub use partner_errors::PartnerErrorTable;
pub use reconcile::{ReconciliationReport, Reconciler};
pub use shutdown::ShutdownSignal;
pub use store::{DealStore, InMemoryDealStore, OutstandingRecord, ReconciledRecord, StoreError};
