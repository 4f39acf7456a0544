use serde_json::{Number, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, ValueRef};
use thiserror::Error;

use nurture_core::domain::knowledge::TabularResult;

use crate::DbPool;

/// Schema handed to SQL generation. Mirrors `unit_listing` in the migrations.
pub const UNIT_LISTING_SCHEMA: &str = "\
Table unit_listing (one row per apartment in a project):
  id TEXT primary key, e.g. 'unit-0402'
  project_name TEXT, e.g. 'Altura Residences'
  unit_type TEXT, one of '1 bed', '2 bed', '3 bed'
  bedrooms INTEGER
  bathrooms INTEGER
  area_sqft INTEGER
  price INTEGER, whole US dollars
  floor INTEGER
  facing TEXT, e.g. 'garden', 'waterfront', 'city', 'corner'
  availability TEXT, one of 'available', 'reserved', 'sold'
  amenities TEXT, comma separated";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("statement rejected: {0}")]
    Rejected(String),
    #[error("query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Read-only access to the analytics tables for generated SQL.
#[derive(Clone)]
pub struct SqlDataStore {
    pool: DbPool,
}

impl SqlDataStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn schema_description(&self) -> &'static str {
        UNIT_LISTING_SCHEMA
    }

    /// Runs one `SELECT`/`WITH` statement and returns its rows as JSON scalars.
    pub async fn run_read_only(&self, sql: &str) -> Result<TabularResult, QueryError> {
        let statement = single_read_statement(sql)?;
        let rows = sqlx::query(statement).fetch_all(&self.pool).await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(row_values).collect::<Result<Vec<_>, _>>()?;

        Ok(TabularResult { columns, rows })
    }
}

fn single_read_statement(sql: &str) -> Result<&str, QueryError> {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        return Err(QueryError::Rejected("empty statement".to_string()));
    }
    if statement.contains(';') {
        return Err(QueryError::Rejected("multiple statements are not allowed".to_string()));
    }

    let keyword = statement
        .split(|ch: char| ch.is_whitespace() || ch == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "with" => Ok(statement),
        other => Err(QueryError::Rejected(format!("only SELECT queries may run, got `{other}`"))),
    }
}

fn row_values(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    (0..row.columns().len())
        .map(|index| {
            if row.try_get_raw(index)?.is_null() {
                return Ok(Value::Null);
            }
            if let Ok(value) = row.try_get::<i64, _>(index) {
                return Ok(Value::from(value));
            }
            if let Ok(value) = row.try_get::<f64, _>(index) {
                return Ok(Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null));
            }
            Ok(row.try_get::<String, _>(index).map(Value::String).unwrap_or(Value::Null))
        })
        .collect()
}
