//! Data-access errors

use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    /// The actor could not be published to the transaction, so the mutation
    /// was rolled back instead of running unattributed.
    #[error("Audit configuration failure: could not set '{variable}': {reason}")]
    AuditConfiguration { variable: String, reason: String },

    #[error("Invalid data call: {0}")]
    InvalidCall(String),

    #[error("No '{entity}' record matched the filter")]
    NotFound { entity: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a non-SQL backend
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DataError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCall(message.into())
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn is_audit_configuration(&self) -> bool {
        matches!(self, Self::AuditConfiguration { .. })
    }
}

impl From<ledgerline_common::LedgerlineError> for DataError {
    fn from(err: ledgerline_common::LedgerlineError) -> Self {
        Self::InvalidCall(err.to_string())
    }
}
