//! Correctness-checked load generator for the line-protocol pub/sub cache.
//!
//! Each [`Scenario`] drives one access pattern against a running cache
//! service, times only the operation under test, and fails if the service
//! loses, duplicates or misreports any message.

pub mod codec;
pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod runner;
pub mod scenario;
pub mod verify;

pub use codec::{KeyPrefix, MessageSet};
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult};
pub use runner::{run, run_with_prefix, Report};
pub use scenario::Scenario;
