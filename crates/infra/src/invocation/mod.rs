//! Partner invocation engine.
//!
//! ## Design
//!
//! - One call is retried under a [`RetryPolicy`] with exponential backoff
//! - Terminal result codes stop the loop immediately
//! - Waits go through a [`Sleeper`] and race the shutdown signal
//! - Known-benign partner failures are logged quietly

pub mod engine;
pub mod error;
pub mod policy;

pub use engine::{InvocationEngine, Sleeper, TokioSleeper};
pub use error::{BenignFailure, InvocationError, PartnerCallError, default_benign_failures};
pub use policy::{RetryMode, RetryPolicy};
