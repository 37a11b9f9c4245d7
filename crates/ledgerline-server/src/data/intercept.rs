//! Attribution-aware decorator around a [`DataBackend`]
//!
//! Reads pass straight through. A mutation issued inside an attribution scope
//! runs in its own transaction: begin, publish the actor with
//! `set_config(<variable>, <user id>, true)`, execute, commit. The audit
//! trigger fires inside that transaction and reads the variable, so the audit
//! row commits or rolls back together with the change it describes.
//!
//! Mutations with no actor run directly. The trigger still records them, with
//! a `NULL` actor.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, instrument, trace, warn};
use uuid::Uuid;

use super::{
    backend::DataBackend,
    call::DataCall,
    error::{DataError, DataResult},
    repository::EntityRepository,
};
use crate::attribution::current_user_id;

/// Session variable the audit trigger reads by default
pub const DEFAULT_SESSION_VARIABLE: &str = "app.current_user_id";

pub struct AttributedDataLayer<B> {
    backend: Arc<B>,
    session_variable: Arc<str>,
}

impl<B> Clone for AttributedDataLayer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            session_variable: Arc::clone(&self.session_variable),
        }
    }
}

impl<B> std::fmt::Debug for AttributedDataLayer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributedDataLayer")
            .field("session_variable", &self.session_variable)
            .finish_non_exhaustive()
    }
}

impl<B: DataBackend> AttributedDataLayer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            session_variable: Arc::from(DEFAULT_SESSION_VARIABLE),
        }
    }

    /// Publish the actor under a different variable name
    ///
    /// The trigger must be attached with the same name
    /// (`ledgerline_attach_audit(table, name)`).
    pub fn with_session_variable(mut self, name: impl AsRef<str>) -> Self {
        self.session_variable = Arc::from(name.as_ref());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session_variable(&self) -> &str {
        &self.session_variable
    }

    /// Convenience handle for one table
    pub fn repository(&self, entity: impl Into<String>) -> EntityRepository<B> {
        EntityRepository::new(self.clone(), entity)
    }

    /// Run one call, attributing it when it mutates inside an attribution scope
    #[instrument(skip(self, call), fields(entity = %call.entity, operation = %call.operation))]
    pub async fn execute(&self, call: DataCall) -> DataResult<JsonValue> {
        if !call.is_mutating() {
            return self.backend.execute(&call).await;
        }

        match current_user_id() {
            Some(user_id) => self.execute_attributed(&call, user_id).await,
            None => {
                trace!("No actor in scope, running mutation unwrapped");
                self.backend.execute(&call).await
            },
        }
    }

    async fn execute_attributed(&self, call: &DataCall, user_id: Uuid) -> DataResult<JsonValue> {
        let mut tx = self.backend.begin().await?;

        if let Err(err) = self
            .backend
            .set_transaction_variable(&mut tx, &self.session_variable, &user_id.to_string())
            .await
        {
            error!(
                variable = %self.session_variable,
                user_id = %user_id,
                error = %err,
                "Audit configuration failure, mutation aborted"
            );
            self.abandon(tx).await;
            return Err(DataError::AuditConfiguration {
                variable: self.session_variable.to_string(),
                reason: err.to_string(),
            });
        }

        match self.backend.execute_in(&mut tx, call).await {
            Ok(result) => {
                self.backend.commit(tx).await?;
                debug!(
                    entity = %call.entity,
                    operation = %call.operation,
                    actor = %user_id,
                    "Attributed mutation committed"
                );
                Ok(result)
            },
            Err(err) => {
                self.abandon(tx).await;
                Err(err)
            },
        }
    }

    async fn abandon(&self, tx: B::Transaction) {
        if let Err(err) = self.backend.rollback(tx).await {
            // The connection drops the open transaction when it is discarded.
            warn!(error = %err, "Rollback failed");
        }
    }
}
