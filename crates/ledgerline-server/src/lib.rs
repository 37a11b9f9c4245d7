//! Ledgerline Server Library
//!
//! Attributes every mutating data operation to the user who caused it and
//! serves the resulting audit trail.
//!
//! # Overview
//!
//! - **Attribution**: the acting user travels with the request's async
//!   execution tree in a tokio task-local ([`attribution`])
//! - **Data layer**: one decorator wraps each attributed mutation in a
//!   transaction that publishes the actor to the audit trigger ([`data`])
//! - **Audit trail**: filtered, paginated reads that turn soft-delete updates
//!   back into DELETE entries ([`audit`])
//!
//! # Flow
//!
//! ```text
//! request -> AttributionLayer (scope opened)
//!         -> handler -> AttributedDataLayer::execute
//!             BEGIN; SELECT set_config('app.current_user_id', $user, true);
//!             <mutation>   -- ledgerline_audit_row() fires here
//!             COMMIT
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ledgerline_server::{
//!     attribution::run_with_attribution,
//!     data::{AttributedDataLayer, PgBackend},
//! };
//! use serde_json::json;
//! use sqlx::PgPool;
//! use uuid::Uuid;
//!
//! # async fn example(pool: PgPool, user: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let layer = AttributedDataLayer::new(PgBackend::new(pool));
//! let courses = layer.repository("courses");
//!
//! run_with_attribution(user, async {
//!     courses.create(json!({"title": "Ownership"})).await
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod attribution;
pub mod audit;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod middleware;

pub use error::AppError;
