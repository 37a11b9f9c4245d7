//! Ledgerline Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the Ledgerline workspace.
//!
//! - **Error Handling**: [`LedgerlineError`] and the SQL identifier guard used by the data layer
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables

pub mod error;
pub mod logging;

pub use error::{validate_identifier, LedgerlineError, Result};
