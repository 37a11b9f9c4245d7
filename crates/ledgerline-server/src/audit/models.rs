//! Audit trail data models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::{fmt, str::FromStr};
use uuid::Uuid;

// ============================================================================
// Query Constants
// ============================================================================

pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest page a caller may request; exports ask for exactly this much
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100_000;

/// JSON key whose null -> non-null transition marks a soft delete
pub const DELETED_AT_KEY: &str = "deleted_at";

/// One row of `audit_log`, joined with the actor's display name
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    /// BIGSERIAL; serialized as a string so JavaScript clients keep every digit
    #[serde(serialize_with = "serialize_id")]
    pub id: i64,
    pub affected_table: String,
    pub affected_row_id: String,
    /// As stored: `CREATE`, `UPDATE` or `DELETE`
    pub operation: String,
    pub previous_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn serialize_id<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

impl AuditLogEntry {
    /// UPDATE rows that took `deleted_at` from null to a value
    pub fn is_soft_delete(&self) -> bool {
        let key_of = |values: &Option<JsonValue>| {
            values
                .as_ref()
                .and_then(|v| v.get(DELETED_AT_KEY))
                .filter(|v| !v.is_null())
                .is_some()
        };

        self.operation == "UPDATE" && !key_of(&self.previous_values) && key_of(&self.new_values)
    }
}

/// Operation filter; `Delete` also matches soft deletes recorded as UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("unknown operation '{s}', expected CREATE, UPDATE or DELETE")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Timestamp,
    Id,
    AffectedTable,
    AffectedRowId,
    Operation,
    Actor,
}

impl SortField {
    /// Column expression in the audit query (`a` = audit_log, `u` = users)
    pub fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "a.timestamp",
            Self::Id => "a.id",
            Self::AffectedTable => "a.affected_table",
            Self::AffectedRowId => "a.affected_row_id",
            Self::Operation => "a.operation",
            Self::Actor => "u.display_name",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "id" => Ok(Self::Id),
            "affected_table" | "affectedtable" => Ok(Self::AffectedTable),
            "affected_row_id" | "affectedrowid" => Ok(Self::AffectedRowId),
            "operation" => Ok(Self::Operation),
            "actor" | "actor_name" => Ok(Self::Actor),
            _ => Err(format!("cannot sort audit logs by '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            _ => Err(format!("unknown sort direction '{s}'")),
        }
    }
}

/// Filters for [`AuditQueryService::find_all`](super::AuditQueryService::find_all)
///
/// Doubles as the query string of the list and export endpoints; empty
/// parameters (`?operation=`) count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    /// First day included, UTC
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub date_from: Option<NaiveDate>,
    /// Last day included, UTC
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub affected_table: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub operation: Option<AuditOperation>,
    /// Substring of the table name or row id
    #[serde(default, alias = "free_text_search", deserialize_with = "empty_string_as_none")]
    pub search: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub page_size: Option<i64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub sort_field: Option<SortField>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub sort_direction: Option<SortDirection>,
}

fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

/// One page of audit entries
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogPage {
    pub data: Vec<AuditLogEntry>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

impl AuditLogPage {
    pub fn new(data: Vec<AuditLogEntry>, total: i64, page: i64, page_size: i64) -> Self {
        Self {
            data,
            total,
            page,
            total_pages: total_pages(total, page_size),
        }
    }
}

/// `ceil(total / page_size)`, zero for an empty result
pub fn total_pages(total: i64, page_size: i64) -> i64 {
    if total <= 0 || page_size <= 0 {
        return 0;
    }
    (total + page_size - 1) / page_size
}
