//! Per-table convenience handle
//!
//! Every method builds a [`DataCall`] and routes it through the
//! [`AttributedDataLayer`], so new tables need no code here or in the layer.

use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};

use super::{
    backend::DataBackend,
    call::{CallArguments, DataCall, OperationKind},
    error::{DataError, DataResult},
    intercept::AttributedDataLayer,
};

/// Column marking a row as soft-deleted
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

pub type Filter = Map<String, JsonValue>;

#[derive(Debug)]
pub struct EntityRepository<B> {
    layer: AttributedDataLayer<B>,
    entity: String,
}

impl<B> Clone for EntityRepository<B> {
    fn clone(&self) -> Self {
        Self {
            layer: self.layer.clone(),
            entity: self.entity.clone(),
        }
    }
}

impl<B: DataBackend> EntityRepository<B> {
    pub fn new(layer: AttributedDataLayer<B>, entity: impl Into<String>) -> Self {
        Self {
            layer,
            entity: entity.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    async fn run(&self, operation: OperationKind, arguments: CallArguments) -> DataResult<JsonValue> {
        self.layer
            .execute(DataCall::new(self.entity.clone(), operation, arguments))
            .await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn find_unique(&self, filter: Filter) -> DataResult<Option<JsonValue>> {
        let row = self.run(OperationKind::FindUnique, CallArguments::filtered(filter)).await?;
        Ok((!row.is_null()).then_some(row))
    }

    pub async fn find_first(&self, arguments: CallArguments) -> DataResult<Option<JsonValue>> {
        let row = self.run(OperationKind::FindFirst, arguments).await?;
        Ok((!row.is_null()).then_some(row))
    }

    pub async fn find_many(&self, arguments: CallArguments) -> DataResult<Vec<JsonValue>> {
        match self.run(OperationKind::FindMany, arguments).await? {
            JsonValue::Array(rows) => Ok(rows),
            other => Err(DataError::Backend(format!("findMany returned {other}"))),
        }
    }

    pub async fn count(&self, filter: Filter) -> DataResult<u64> {
        count_of(self.run(OperationKind::Count, CallArguments::filtered(filter)).await?)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn create(&self, data: JsonValue) -> DataResult<JsonValue> {
        self.run(OperationKind::Create, CallArguments::default().with_data(data))
            .await
    }

    pub async fn create_many(&self, rows: Vec<JsonValue>) -> DataResult<u64> {
        count_of(
            self.run(
                OperationKind::CreateMany,
                CallArguments::default().with_data(JsonValue::Array(rows)),
            )
            .await?,
        )
    }

    /// Update the row matching `filter`; `NotFound` when none does
    pub async fn update(&self, filter: Filter, data: JsonValue) -> DataResult<JsonValue> {
        self.run(OperationKind::Update, CallArguments::filtered(filter).with_data(data))
            .await
    }

    pub async fn update_many(&self, filter: Filter, data: JsonValue) -> DataResult<u64> {
        count_of(
            self.run(OperationKind::UpdateMany, CallArguments::filtered(filter).with_data(data))
                .await?,
        )
    }

    /// Physically delete the row matching `filter`
    pub async fn delete(&self, filter: Filter) -> DataResult<JsonValue> {
        self.run(OperationKind::Delete, CallArguments::filtered(filter)).await
    }

    pub async fn delete_many(&self, filter: Filter) -> DataResult<u64> {
        count_of(self.run(OperationKind::DeleteMany, CallArguments::filtered(filter)).await?)
    }

    /// Insert `create` (plus the key columns of `filter`), or apply `update`
    /// when a row with those keys exists
    pub async fn upsert(&self, filter: Filter, create: JsonValue, update: Filter) -> DataResult<JsonValue> {
        self.run(
            OperationKind::Upsert,
            CallArguments::filtered(filter).with_data(create).with_update(update),
        )
        .await
    }

    /// Mark the live row matching `filter` as deleted
    ///
    /// Audited as an UPDATE whose previous `deleted_at` is null and whose new
    /// one is set, which the audit query reports as a DELETE.
    pub async fn soft_delete(&self, filter: Filter) -> DataResult<JsonValue> {
        let (filter, data) = soft_delete_arguments(filter);
        self.update(filter, data).await
    }

    pub async fn soft_delete_many(&self, filter: Filter) -> DataResult<u64> {
        let (filter, data) = soft_delete_arguments(filter);
        self.update_many(filter, data).await
    }
}

fn soft_delete_arguments(mut filter: Filter) -> (Filter, JsonValue) {
    filter.insert(SOFT_DELETE_COLUMN.to_string(), JsonValue::Null);
    (filter, json!({ SOFT_DELETE_COLUMN: Utc::now() }))
}

fn count_of(result: JsonValue) -> DataResult<u64> {
    result
        .get("count")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| DataError::Backend(format!("expected a count result, got {result}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{attribution::run_with_attribution, data::testing::RecordingBackend};
    use uuid::Uuid;

    fn filter(value: JsonValue) -> Filter {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_soft_delete_records_update_with_deleted_at_transition() {
        let layer = AttributedDataLayer::new(RecordingBackend::new());
        let courses = layer.repository("courses");
        let user = Uuid::new_v4();

        run_with_attribution(user, courses.soft_delete(filter(json!({"id": 12}))))
            .await
            .unwrap();

        let audit = layer.backend().audit_rows();
        assert_eq!(audit.len(), 1);
        let row = &audit[0];
        assert_eq!(row.operation, "UPDATE");
        assert_eq!(row.row_id, "12");
        assert_eq!(row.actor, Some(user.to_string()));
        assert!(row.previous_values.as_ref().unwrap()[SOFT_DELETE_COLUMN].is_null());
        assert!(row.new_values.as_ref().unwrap()[SOFT_DELETE_COLUMN].is_string());
    }

    #[test]
    fn test_soft_delete_only_targets_live_rows() {
        let (filter, data) = soft_delete_arguments(filter(json!({"id": 3})));

        assert_eq!(filter.get(SOFT_DELETE_COLUMN), Some(&JsonValue::Null));
        assert!(data[SOFT_DELETE_COLUMN].is_string());
    }

    #[tokio::test]
    async fn test_reads_unwrap_results() {
        let layer = AttributedDataLayer::new(RecordingBackend::new());
        let courses = layer.repository("courses");

        assert_eq!(courses.find_unique(filter(json!({"id": 1}))).await.unwrap(), None);
        assert!(courses.find_many(CallArguments::default()).await.unwrap().is_empty());
        assert_eq!(courses.count(Filter::new()).await.unwrap(), 0);
    }

    #[test]
    fn test_count_of_rejects_non_count_results() {
        assert_eq!(count_of(json!({"count": 4})).unwrap(), 4);
        assert!(count_of(json!([])).is_err());
    }
}
