//! Data access with automatic audit attribution
//!
//! [`DataBackend`] is the single seam. [`AttributedDataLayer`] decorates any
//! backend and is the only place mutations are wrapped, and [`PgBackend`]
//! runs calls against any PostgreSQL table without per-entity code.

mod backend;
mod call;
mod error;
mod intercept;
mod postgres;
mod repository;
pub mod row_key;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::DataBackend;
pub use call::{CallArguments, DataCall, OperationKind, OrderBy};
pub use error::{DataError, DataResult};
pub use intercept::{AttributedDataLayer, DEFAULT_SESSION_VARIABLE};
pub use postgres::PgBackend;
pub use repository::{EntityRepository, Filter, SOFT_DELETE_COLUMN};
