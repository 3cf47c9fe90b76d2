// src/db/mod.rs
// Read-only query execution over sqlite. The engine never writes: file
// databases are opened with mode=ro and the agent's validator rejects
// anything that is not SELECT-shaped before it gets here.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row};

/// Header row plus data rows, decoded to JSON values column by column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultTable {
    pub fn data_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Header + data rows, the shape the original wire format used.
    pub fn total_len(&self) -> usize {
        if self.columns.is_empty() && self.rows.is_empty() {
            0
        } else {
            self.rows.len() + 1
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    max_rows: usize,
}

impl Database {
    pub fn new(pool: SqlitePool, max_rows: usize) -> Self {
        Self { pool, max_rows }
    }

    /// Open a sqlite database read-only. `:memory:` is accepted for tests.
    pub async fn connect(path: &str, max_connections: u32, max_rows: usize) -> Result<Self> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=ro")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        Ok(Self::new(pool, max_rows))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a single SELECT statement with a bounded result set.
    ///
    /// A LIMIT is appended when the statement has none, mirroring the row
    /// cap the generation prompt asks for.
    pub async fn select(&self, sql: &str) -> Result<ResultTable> {
        let upper = sql.to_ascii_uppercase();
        let bounded;
        let final_sql = if upper.contains("LIMIT") {
            sql
        } else {
            bounded = format!("{} LIMIT {}", sql.trim_end(), self.max_rows);
            &bounded
        };

        let rows = sqlx::query(final_sql).fetch_all(&self.pool).await?;

        let columns: Vec<String> = if let Some(first_row) = rows.first() {
            first_row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        } else {
            vec![]
        };

        // SQLite types can be tricky (especially for aggregates), so try
        // several decodes per cell rather than trusting declared types.
        let row_data: Vec<Vec<serde_json::Value>> = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, _col)| {
                        if let Ok(v) = row.try_get::<i64, _>(i) {
                            return serde_json::Value::from(v);
                        }
                        if let Ok(v) = row.try_get::<f64, _>(i) {
                            return serde_json::Value::from(v);
                        }
                        if let Ok(v) = row.try_get::<bool, _>(i) {
                            return serde_json::Value::from(v);
                        }
                        if let Ok(v) = row.try_get::<String, _>(i) {
                            return serde_json::Value::from(v);
                        }
                        if let Ok(Some(v)) = row.try_get::<Option<String>, _>(i) {
                            return serde_json::Value::from(v);
                        }
                        serde_json::Value::Null
                    })
                    .collect()
            })
            .collect();

        Ok(ResultTable {
            columns,
            rows: row_data,
        })
    }
}
