//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the orchestrator workspace: test data builders,
//! mock dispatchers and probes, and async polling helpers.
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
