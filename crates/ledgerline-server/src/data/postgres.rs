//! Generic PostgreSQL backend
//!
//! Calls are translated into SQL without any per-entity code: row values travel
//! as a single JSONB parameter and `jsonb_populate_record(NULL::<table>, $n)`
//! turns that parameter into a typed record of the target table, so Postgres
//! performs every column conversion. Table and column names are checked with
//! [`validate_identifier`] before they are spliced into the statement.

use async_trait::async_trait;
use ledgerline_common::validate_identifier;
use serde_json::{json, Map, Value as JsonValue};
use sqlx::{postgres::PgConnection, types::Json, PgPool, Postgres, Transaction};
use tracing::trace;

use super::{
    backend::DataBackend,
    call::{CallArguments, DataCall, OperationKind},
    error::{DataError, DataResult},
};

#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DataBackend for PgBackend {
    type Transaction = Transaction<'static, Postgres>;

    async fn execute(&self, call: &DataCall) -> DataResult<JsonValue> {
        let statement = build_statement(call)?;
        let mut conn = self.pool.acquire().await?;
        run_statement(&mut conn, &statement, &call.entity).await
    }

    async fn begin(&self) -> DataResult<Self::Transaction> {
        Ok(self.pool.begin().await?)
    }

    async fn set_transaction_variable(
        &self,
        tx: &mut Self::Transaction,
        name: &str,
        value: &str,
    ) -> DataResult<()> {
        // is_local = true: the setting is discarded at COMMIT or ROLLBACK, so a
        // pooled connection never carries it into an unrelated operation.
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(name)
            .bind(value)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn execute_in(
        &self,
        tx: &mut Self::Transaction,
        call: &DataCall,
    ) -> DataResult<JsonValue> {
        let statement = build_statement(call)?;
        run_statement(&mut **tx, &statement, &call.entity).await
    }

    async fn commit(&self, tx: Self::Transaction) -> DataResult<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Transaction) -> DataResult<()> {
        Ok(tx.rollback().await?)
    }
}

/// How the rows of a statement become the call's JSON result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// First row or `null`
    OptionalRow,
    /// First row, `NotFound` when nothing matched
    RequiredRow,
    /// All rows as an array
    Rows,
    /// `SELECT COUNT(*)` result as `{"count": n}`
    Count,
    /// Rows affected as `{"count": n}`
    Affected,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<JsonValue>,
    pub shape: Shape,
}

async fn run_statement(
    conn: &mut PgConnection,
    statement: &Statement,
    entity: &str,
) -> DataResult<JsonValue> {
    trace!(entity = %entity, sql = %statement.sql, "Running data statement");

    match statement.shape {
        Shape::OptionalRow | Shape::RequiredRow | Shape::Rows => {
            let mut query = sqlx::query_scalar::<_, JsonValue>(&statement.sql);
            for param in &statement.params {
                query = query.bind(Json(param));
            }
            let mut rows = query.fetch_all(&mut *conn).await?;

            match statement.shape {
                Shape::Rows => Ok(JsonValue::Array(rows)),
                Shape::RequiredRow if rows.is_empty() => Err(DataError::not_found(entity)),
                _ if rows.is_empty() => Ok(JsonValue::Null),
                _ => Ok(rows.swap_remove(0)),
            }
        },
        Shape::Count => {
            let mut query = sqlx::query_scalar::<_, i64>(&statement.sql);
            for param in &statement.params {
                query = query.bind(Json(param));
            }
            let count = query.fetch_one(&mut *conn).await?;
            Ok(json!({ "count": count }))
        },
        Shape::Affected => {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = query.bind(Json(param));
            }
            let result = query.execute(&mut *conn).await?;
            Ok(json!({ "count": result.rows_affected() }))
        },
    }
}

fn record(table: &str, param: usize) -> String {
    format!("jsonb_populate_record(NULL::{table}, ${param})")
}

fn columns<'a, I>(keys: I) -> DataResult<Vec<&'a str>>
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .map(|key| -> DataResult<&'a str> {
            validate_identifier(key)?;
            Ok(key.as_str())
        })
        .collect()
}

/// `t.col = w.col` per filter key, `t.col IS NULL` for JSON nulls
fn where_clause(filter: &Map<String, JsonValue>) -> DataResult<String> {
    if filter.is_empty() {
        return Ok("TRUE".to_string());
    }

    let conditions = filter
        .iter()
        .map(|(column, value)| -> DataResult<String> {
            validate_identifier(column)?;
            Ok(if value.is_null() {
                format!("t.{column} IS NULL")
            } else {
                format!("t.{column} = w.{column}")
            })
        })
        .collect::<DataResult<Vec<_>>>()?;

    Ok(conditions.join(" AND "))
}

fn read_tail(args: &CallArguments, single: bool) -> DataResult<String> {
    let mut tail = String::new();

    if let Some(ref order) = args.order_by {
        validate_identifier(&order.column)?;
        tail.push_str(&format!(
            " ORDER BY t.{} {}",
            order.column,
            if order.descending { "DESC" } else { "ASC" }
        ));
    }

    let take = if single { Some(1) } else { args.take };
    if let Some(take) = take {
        if take < 0 {
            return Err(DataError::invalid("take must not be negative"));
        }
        tail.push_str(&format!(" LIMIT {take}"));
    }

    if let Some(skip) = args.skip {
        if skip < 0 {
            return Err(DataError::invalid("skip must not be negative"));
        }
        tail.push_str(&format!(" OFFSET {skip}"));
    }

    Ok(tail)
}

fn require_filter(call: &DataCall) -> DataResult<()> {
    if call.arguments.filter.is_empty() {
        return Err(DataError::invalid(format!(
            "{} on '{}' requires a non-empty where filter",
            call.operation, call.entity
        )));
    }
    Ok(())
}

fn select_list(cols: &[&str], alias: &str) -> String {
    cols.iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn assignments(cols: &[&str], source: impl Fn(&str) -> String) -> String {
    cols.iter()
        .map(|c| format!("{c} = {}", source(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Translate a call into one SQL statement
pub(crate) fn build_statement(call: &DataCall) -> DataResult<Statement> {
    validate_identifier(&call.entity)?;
    let table = call.entity.as_str();
    let args = &call.arguments;
    let filter = JsonValue::Object(args.filter.clone());

    let statement = match call.operation {
        OperationKind::FindUnique | OperationKind::FindFirst | OperationKind::FindMany => {
            if call.operation == OperationKind::FindUnique {
                require_filter(call)?;
            }
            let single = call.operation != OperationKind::FindMany;
            Statement {
                sql: format!(
                    "SELECT to_jsonb(t) FROM {table} AS t, {} AS w WHERE {}{}",
                    record(table, 1),
                    where_clause(&args.filter)?,
                    read_tail(args, single)?
                ),
                params: vec![filter],
                shape: if single { Shape::OptionalRow } else { Shape::Rows },
            }
        },
        OperationKind::Count => Statement {
            sql: format!(
                "SELECT COUNT(*) FROM {table} AS t, {} AS w WHERE {}",
                record(table, 1),
                where_clause(&args.filter)?
            ),
            params: vec![filter],
            shape: Shape::Count,
        },
        OperationKind::Create => {
            let data = args.data_object()?;
            let cols = columns(data.keys())?;
            Statement {
                sql: format!(
                    "INSERT INTO {table} AS t ({}) SELECT {} FROM {} AS d RETURNING to_jsonb(t)",
                    cols.join(", "),
                    select_list(&cols, "d"),
                    record(table, 1)
                ),
                params: vec![args.data.clone()],
                shape: Shape::RequiredRow,
            }
        },
        OperationKind::CreateMany => {
            let rows = args.data_rows()?;
            let Some(first) = rows.first() else {
                return Err(DataError::invalid("createMany needs at least one row"));
            };
            let cols = columns(first.keys())?;
            Statement {
                sql: format!(
                    "INSERT INTO {table} ({}) SELECT {} FROM jsonb_populate_recordset(NULL::{table}, $1) AS d",
                    cols.join(", "),
                    select_list(&cols, "d")
                ),
                params: vec![args.data.clone()],
                shape: Shape::Affected,
            }
        },
        OperationKind::Update | OperationKind::UpdateMany => {
            let single = call.operation == OperationKind::Update;
            if single {
                require_filter(call)?;
            }
            let data = args.data_object()?;
            let cols = columns(data.keys())?;
            Statement {
                sql: format!(
                    "UPDATE {table} AS t SET {} FROM {} AS w, {} AS d WHERE {}{}",
                    assignments(&cols, |c| format!("d.{c}")),
                    record(table, 1),
                    record(table, 2),
                    where_clause(&args.filter)?,
                    if single { " RETURNING to_jsonb(t)" } else { "" }
                ),
                params: vec![filter, args.data.clone()],
                shape: if single { Shape::RequiredRow } else { Shape::Affected },
            }
        },
        OperationKind::Delete | OperationKind::DeleteMany => {
            let single = call.operation == OperationKind::Delete;
            if single {
                require_filter(call)?;
            }
            Statement {
                sql: format!(
                    "DELETE FROM {table} AS t USING {} AS w WHERE {}{}",
                    record(table, 1),
                    where_clause(&args.filter)?,
                    if single { " RETURNING to_jsonb(t)" } else { "" }
                ),
                params: vec![filter],
                shape: if single { Shape::RequiredRow } else { Shape::Affected },
            }
        },
        OperationKind::Upsert => {
            require_filter(call)?;
            let update = match args.update {
                Some(ref update) if !update.is_empty() => update,
                _ => return Err(DataError::invalid("upsert needs a non-empty update branch")),
            };

            // The create branch always carries the key columns it conflicts on.
            let mut insert = args.filter.clone();
            if let JsonValue::Object(ref data) = args.data {
                insert.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            }

            let insert_cols = columns(insert.keys())?;
            let conflict_cols = columns(args.filter.keys())?;
            let update_cols = columns(update.keys())?;
            let update_record = record(table, 2);

            Statement {
                sql: format!(
                    "INSERT INTO {table} AS t ({}) SELECT {} FROM {} AS d \
                     ON CONFLICT ({}) DO UPDATE SET {} RETURNING to_jsonb(t)",
                    insert_cols.join(", "),
                    select_list(&insert_cols, "d"),
                    record(table, 1),
                    conflict_cols.join(", "),
                    assignments(&update_cols, |c| format!("({update_record}).{c}"))
                ),
                params: vec![JsonValue::Object(insert), JsonValue::Object(update.clone())],
                shape: Shape::RequiredRow,
            }
        },
    };

    Ok(statement)
}
