//! The narrow seam the interception layer decorates

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{call::DataCall, error::DataResult};

/// A storage backend able to run [`DataCall`]s directly or inside a transaction
///
/// Results are JSON: a row object (or `null`) for single-row operations, an
/// array for `findMany`, and `{"count": n}` for counts and bulk writes.
#[async_trait]
pub trait DataBackend: Send + Sync + 'static {
    type Transaction: Send;

    /// Run the call on its own, outside any transaction this layer manages
    async fn execute(&self, call: &DataCall) -> DataResult<JsonValue>;

    async fn begin(&self) -> DataResult<Self::Transaction>;

    /// Set a session variable that lives only until `tx` ends
    async fn set_transaction_variable(
        &self,
        tx: &mut Self::Transaction,
        name: &str,
        value: &str,
    ) -> DataResult<()>;

    /// Run the call on the connection owned by `tx`
    async fn execute_in(&self, tx: &mut Self::Transaction, call: &DataCall)
        -> DataResult<JsonValue>;

    async fn commit(&self, tx: Self::Transaction) -> DataResult<()>;

    async fn rollback(&self, tx: Self::Transaction) -> DataResult<()>;
}
