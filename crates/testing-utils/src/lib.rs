//! # Transfer Testing Utils
//!
//! Shared test doubles for the transfer scheduler workspace.
//!
//! - **Mock stores**: in-memory `TaskStore`, `ProgressStore` and `CompletionNotifier`
//! - **Builders**: offers, jobs, tasks and executors with sensible defaults
//! - **Helpers**: polling utilities for tests that drive background loops
//!
//! ```toml
//! [dev-dependencies]
//! transfer-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
