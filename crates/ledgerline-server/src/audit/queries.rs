//! Filtered, paginated reads over the audit trail

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, error, instrument};

use super::models::{
    AuditLogEntry, AuditLogFilter, AuditLogPage, AuditOperation, SortDirection, SortField,
    DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE, DELETED_AT_KEY,
};

#[derive(Error, Debug)]
pub enum AuditQueryError {
    #[error("Invalid audit log filter: {0}")]
    InvalidFilter(String),

    /// Storage failure; the cause is logged where it happens and not carried
    #[error("Failed to retrieve audit logs")]
    Retrieval,
}

#[derive(Debug, Clone)]
pub struct AuditQueryService {
    pool: PgPool,
    max_page_size: i64,
}

impl AuditQueryService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn max_page_size(&self) -> i64 {
        self.max_page_size
    }

    /// One page of entries matching `filter`, plus the overall match count
    #[instrument(skip(self))]
    pub async fn find_all(&self, filter: &AuditLogFilter) -> Result<AuditLogPage, AuditQueryError> {
        let plan = QueryPlan::resolve(filter, self.max_page_size)?;

        let total: i64 = plan
            .count_query()
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(retrieval_error)?;

        let data: Vec<AuditLogEntry> = plan
            .page_query()
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(retrieval_error)?;

        debug!(total, returned = data.len(), page = plan.page, "Queried audit logs");

        Ok(AuditLogPage::new(data, total, plan.page, plan.page_size))
    }

    /// Every matching entry in one page, for report exports
    pub async fn export(&self, filter: &AuditLogFilter) -> Result<AuditLogPage, AuditQueryError> {
        let filter = AuditLogFilter {
            page: Some(1),
            page_size: Some(self.max_page_size),
            ..filter.clone()
        };
        self.find_all(&filter).await
    }
}

fn retrieval_error(err: sqlx::Error) -> AuditQueryError {
    error!(error = %err, "Audit log query failed");
    AuditQueryError::Retrieval
}

/// A validated filter, ready to be rendered as SQL
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueryPlan {
    from: Option<DateTime<Utc>>,
    /// Midnight after `date_to`, exclusive
    until: Option<DateTime<Utc>>,
    affected_table: Option<String>,
    operation: Option<AuditOperation>,
    search_pattern: Option<String>,
    pub page: i64,
    pub page_size: i64,
    sort_field: SortField,
    sort_direction: SortDirection,
}

impl QueryPlan {
    pub(crate) fn resolve(filter: &AuditLogFilter, max_page_size: i64) -> Result<Self, AuditQueryError> {
        let page = filter.page.unwrap_or(1);
        if page < 1 {
            return Err(AuditQueryError::InvalidFilter("page must be at least 1".into()));
        }

        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size < 1 {
            return Err(AuditQueryError::InvalidFilter("page_size must be at least 1".into()));
        }

        let until = filter
            .date_to
            .map(|date| {
                date.succ_opt()
                    .ok_or_else(|| AuditQueryError::InvalidFilter(format!("date_to {date} is out of range")))
                    .and_then(start_of_day)
            })
            .transpose()?;

        Ok(Self {
            from: filter.date_from.map(start_of_day).transpose()?,
            until,
            affected_table: filter.affected_table.as_ref().map(|t| t.trim().to_string()),
            operation: filter.operation,
            search_pattern: filter.search.as_deref().map(|s| format!("%{}%", escape_like(s.trim()))),
            page,
            page_size: page_size.min(max_page_size),
            sort_field: filter.sort_field.unwrap_or_default(),
            sort_direction: filter.sort_direction.unwrap_or_default(),
        })
    }

    fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub(crate) fn count_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut query = QueryBuilder::new(
            "SELECT COUNT(*) FROM audit_log a LEFT JOIN users u ON u.id = a.actor_id WHERE TRUE",
        );
        self.push_conditions(&mut query);
        query
    }

    pub(crate) fn page_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut query = QueryBuilder::new(
            "SELECT a.id, a.affected_table, a.affected_row_id, a.operation, \
             a.previous_values, a.new_values, a.actor_id, u.display_name AS actor_name, \
             a.timestamp \
             FROM audit_log a LEFT JOIN users u ON u.id = a.actor_id WHERE TRUE",
        );
        self.push_conditions(&mut query);

        let direction = self.sort_direction.as_sql();
        query.push(format_args!(" ORDER BY {} {direction}", self.sort_field.column()));
        if self.sort_field != SortField::Id {
            // Stable paging when the sort column has ties
            query.push(format_args!(", a.id {direction}"));
        }

        query.push(" LIMIT ").push_bind(self.page_size);
        query.push(" OFFSET ").push_bind(self.offset());
        query
    }

    fn push_conditions(&self, query: &mut QueryBuilder<'static, Postgres>) {
        if let Some(from) = self.from {
            query.push(" AND a.timestamp >= ").push_bind(from);
        }
        if let Some(until) = self.until {
            query.push(" AND a.timestamp < ").push_bind(until);
        }
        if let Some(ref table) = self.affected_table {
            query
                .push(" AND lower(a.affected_table) = lower(")
                .push_bind(table.clone())
                .push(")");
        }
        match self.operation {
            Some(AuditOperation::Delete) => {
                // Soft deletes: the row keeps existing, deleted_at goes from null to a value.
                query.push(format_args!(
                    " AND a.operation = 'UPDATE' \
                     AND a.previous_values ->> '{DELETED_AT_KEY}' IS NULL \
                     AND a.new_values ->> '{DELETED_AT_KEY}' IS NOT NULL"
                ));
            },
            Some(operation) => {
                query.push(" AND a.operation = ").push_bind(operation.as_str());
            },
            None => {},
        }
        if let Some(ref pattern) = self.search_pattern {
            query
                .push(" AND (a.affected_table ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR a.affected_row_id ILIKE ")
                .push_bind(pattern.clone())
                .push(")");
        }
    }
}

fn start_of_day(date: NaiveDate) -> Result<DateTime<Utc>, AuditQueryError> {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| AuditQueryError::InvalidFilter(format!("invalid date {date}")))
}

/// Escape LIKE wildcards so the search term matches literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plan(filter: AuditLogFilter) -> QueryPlan {
        QueryPlan::resolve(&filter, DEFAULT_MAX_PAGE_SIZE).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_defaults() {
        let plan = plan(AuditLogFilter::default());

        assert_eq!(plan.page, 1);
        assert_eq!(plan.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(plan.sort_field, SortField::Timestamp);
        assert_eq!(plan.sort_direction, SortDirection::Desc);

        let sql = plan.page_query().sql().to_string();
        assert!(sql.ends_with("WHERE TRUE ORDER BY a.timestamp DESC, a.id DESC LIMIT $1 OFFSET $2"));
    }

    #[test]
    fn test_synthetic_delete_filter() {
        let plan = plan(AuditLogFilter {
            operation: Some(AuditOperation::Delete),
            ..Default::default()
        });

        let sql = plan.count_query().sql().to_string();
        assert!(sql.contains(
            "a.operation = 'UPDATE' \
             AND a.previous_values ->> 'deleted_at' IS NULL \
             AND a.new_values ->> 'deleted_at' IS NOT NULL"
        ));
        assert!(!sql.contains("'DELETE'"));
    }

    #[test]
    fn test_update_filter_matches_operation_only() {
        let plan = plan(AuditLogFilter {
            operation: Some(AuditOperation::Update),
            ..Default::default()
        });

        let sql = plan.count_query().sql().to_string();
        assert!(sql.ends_with("AND a.operation = $1"));
        assert!(!sql.contains("deleted_at"));
    }

    #[test]
    fn test_date_to_extends_to_following_midnight() {
        let plan = plan(AuditLogFilter {
            date_from: Some(date(2025, 3, 1)),
            date_to: Some(date(2025, 3, 31)),
            ..Default::default()
        });

        let until = plan.until.unwrap();
        assert_eq!(until, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(plan.from.unwrap(), Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());

        let last_moment = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap()
            + Duration::milliseconds(999);
        assert!(last_moment < until);

        let sql = plan.count_query().sql().to_string();
        assert!(sql.contains("a.timestamp >= $1 AND a.timestamp < $2"));
    }

    #[test]
    fn test_table_filter_is_case_insensitive() {
        let plan = plan(AuditLogFilter {
            affected_table: Some(" Courses ".into()),
            ..Default::default()
        });

        assert_eq!(plan.affected_table.as_deref(), Some("Courses"));
        assert!(plan
            .count_query()
            .sql()
            .contains("lower(a.affected_table) = lower($1)"));
    }

    #[test]
    fn test_search_matches_table_or_row_id_literally() {
        let plan = plan(AuditLogFilter {
            search: Some("50%_off".into()),
            ..Default::default()
        });

        assert_eq!(plan.search_pattern.as_deref(), Some("%50\\%\\_off%"));
        assert!(plan
            .count_query()
            .sql()
            .contains("(a.affected_table ILIKE $1 OR a.affected_row_id ILIKE $2)"));
    }

    #[test]
    fn test_sort_by_actor_ascending() {
        let plan = plan(AuditLogFilter {
            sort_field: Some(SortField::Actor),
            sort_direction: Some(SortDirection::Asc),
            ..Default::default()
        });

        assert!(plan
            .page_query()
            .sql()
            .contains("ORDER BY u.display_name ASC, a.id ASC"));
    }

    #[test]
    fn test_sort_by_id_has_no_tie_breaker() {
        let plan = plan(AuditLogFilter {
            sort_field: Some(SortField::Id),
            ..Default::default()
        });

        assert!(plan.page_query().sql().contains("ORDER BY a.id DESC LIMIT"));
    }

    #[test]
    fn test_paging_offsets_and_limits() {
        let plan = plan(AuditLogFilter {
            page: Some(4),
            page_size: Some(10),
            ..Default::default()
        });
        assert_eq!(plan.offset(), 30);

        let capped = QueryPlan::resolve(
            &AuditLogFilter {
                page_size: Some(1_000_000),
                ..Default::default()
            },
            500,
        )
        .unwrap();
        assert_eq!(capped.page_size, 500);
    }

    #[test]
    fn test_invalid_paging_rejected() {
        for filter in [
            AuditLogFilter {
                page: Some(0),
                ..Default::default()
            },
            AuditLogFilter {
                page_size: Some(0),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                QueryPlan::resolve(&filter, DEFAULT_MAX_PAGE_SIZE),
                Err(AuditQueryError::InvalidFilter(_))
            ));
        }
    }

    #[test]
    fn test_retrieval_error_hides_cause() {
        let err = retrieval_error(sqlx::Error::PoolTimedOut);
        assert_eq!(err.to_string(), "Failed to retrieve audit logs");
    }
}
