//! Audit trail queries
//!
//! Rows are written by the `ledgerline_audit_row()` trigger inside the same
//! transaction as the change they describe (see [`crate::data`]); this module
//! only reads them back.
//!
//! Soft deletes are stored as UPDATE rows. Asking for `operation = DELETE`
//! returns the UPDATE rows whose `deleted_at` went from null to a value, while
//! `operation = UPDATE` returns every UPDATE row, soft deletes included.
//!
//! ```no_run
//! use ledgerline_server::audit::{AuditLogFilter, AuditOperation, AuditQueryService};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let service = AuditQueryService::new(pool);
//! let deletes = service
//!     .find_all(&AuditLogFilter {
//!         affected_table: Some("courses".into()),
//!         operation: Some(AuditOperation::Delete),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{} soft deletes on {} pages", deletes.total, deletes.total_pages);
//! # Ok(())
//! # }
//! ```

mod models;
mod queries;
mod routes;

pub use models::{
    total_pages, AuditLogEntry, AuditLogFilter, AuditLogPage, AuditOperation, SortDirection,
    SortField, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE, DELETED_AT_KEY,
};
pub use queries::{AuditQueryError, AuditQueryService};
pub use routes::audit_routes;
