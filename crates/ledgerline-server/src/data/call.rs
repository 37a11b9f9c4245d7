//! The unit the interception layer observes: one call against one entity

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::error::{DataError, DataResult};

/// Kind of data-access operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    FindUnique,
    FindFirst,
    FindMany,
    Count,
    Create,
    CreateMany,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
    Upsert,
}

impl OperationKind {
    /// Every operation that changes persisted state
    pub const MUTATING: [OperationKind; 7] = [
        Self::Create,
        Self::CreateMany,
        Self::Update,
        Self::UpdateMany,
        Self::Delete,
        Self::DeleteMany,
        Self::Upsert,
    ];

    pub fn is_mutating(self) -> bool {
        Self::MUTATING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FindUnique => "findUnique",
            Self::FindFirst => "findFirst",
            Self::FindMany => "findMany",
            Self::Count => "count",
            Self::Create => "create",
            Self::CreateMany => "createMany",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
            Self::Upsert => "upsert",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a [`DataCall`]
///
/// `filter` is a conjunction of column equalities (a JSON `null` matches SQL
/// `NULL`). `data` is the row to write: an object, or an array of objects for
/// `createMany`. `update` is the update branch of an upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArguments {
    #[serde(default, rename = "where")]
    pub filter: Map<String, JsonValue>,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl CallArguments {
    pub fn filtered(filter: Map<String, JsonValue>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn with_update(mut self, update: Map<String, JsonValue>) -> Self {
        self.update = Some(update);
        self
    }

    pub fn ordered_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    pub fn paged(mut self, skip: i64, take: i64) -> Self {
        self.skip = Some(skip);
        self.take = Some(take);
        self
    }

    /// `data` as a single row object
    pub(crate) fn data_object(&self) -> DataResult<&Map<String, JsonValue>> {
        match &self.data {
            JsonValue::Object(map) if !map.is_empty() => Ok(map),
            JsonValue::Object(_) => Err(DataError::invalid("data must set at least one column")),
            _ => Err(DataError::invalid("data must be a JSON object")),
        }
    }

    /// `data` as a batch of row objects sharing one column set
    pub(crate) fn data_rows(&self) -> DataResult<Vec<&Map<String, JsonValue>>> {
        let JsonValue::Array(items) = &self.data else {
            return Err(DataError::invalid("data must be a JSON array for createMany"));
        };

        let rows = items
            .iter()
            .map(|item| match item {
                JsonValue::Object(map) if !map.is_empty() => Ok(map),
                _ => Err(DataError::invalid("every createMany row must be a non-empty object")),
            })
            .collect::<DataResult<Vec<_>>>()?;

        if let Some(first) = rows.first() {
            let same_columns = |row: &&Map<String, JsonValue>| {
                row.len() == first.len() && row.keys().all(|k| first.contains_key(k))
            };
            if !rows.iter().all(same_columns) {
                return Err(DataError::invalid("createMany rows must all set the same columns"));
            }
        }

        Ok(rows)
    }
}

/// One intercepted data-access call: `{entity, operation, arguments}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCall {
    /// Table the call targets
    pub entity: String,
    pub operation: OperationKind,
    pub arguments: CallArguments,
}

impl DataCall {
    pub fn new(entity: impl Into<String>, operation: OperationKind, arguments: CallArguments) -> Self {
        Self {
            entity: entity.into(),
            operation,
            arguments,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.operation.is_mutating()
    }
}
