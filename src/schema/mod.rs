// src/schema/mod.rs
// Schema introspection and entity-value lookup. The provider is built once
// at startup and read-only afterwards, so concurrent sessions share it
// behind an Arc without locking.

use anyhow::Result;
use serde_json::json;
use sqlx::Row;
use tracing::warn;

use crate::db::Database;

pub mod embeddings;
pub mod relevance;

pub use embeddings::{EmbeddingClient, SchemaIndex};

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// The textual fragment handed to prompts and the similarity index.
    pub fn fragment(&self) -> String {
        let mut out = format!("Table: {}\n", self.name);
        for col in &self.columns {
            out.push_str(&format!("  - {} ({})\n", col.name, col.ty));
        }
        out
    }
}

pub struct SchemaProvider {
    db: Database,
    tables: Vec<TableInfo>,
    table_names: Vec<String>,
    full_schema: String,
    index: Option<SchemaIndex>,
}

impl SchemaProvider {
    /// Introspect the database catalog once.
    pub async fn load(db: Database) -> Result<Self> {
        let names: Vec<String> = sqlx::query(
            r#"
            SELECT name FROM sqlite_master
            WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'
            ORDER BY name
            "#,
        )
        .fetch_all(db.pool())
        .await?
        .iter()
        .map(|row| row.get::<String, _>(0))
        .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            let columns: Vec<ColumnInfo> =
                sqlx::query("SELECT name, type FROM pragma_table_info($1)")
                    .bind(name)
                    .fetch_all(db.pool())
                    .await?
                    .iter()
                    .map(|row| ColumnInfo {
                        name: row.get::<String, _>(0),
                        ty: row.get::<String, _>(1),
                    })
                    .collect();
            tables.push(TableInfo {
                name: name.clone(),
                columns,
            });
        }

        let full_schema = tables
            .iter()
            .map(TableInfo::fragment)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Self {
            db,
            table_names: names,
            tables,
            full_schema,
            index: None,
        })
    }

    /// Build the similarity index over per-table fragments. Failure is
    /// reported to the caller; the provider keeps working without an index.
    pub async fn attach_index(
        &mut self,
        embedder: EmbeddingClient,
        top_k: usize,
    ) -> Result<()> {
        let fragments: Vec<String> = self.tables.iter().map(TableInfo::fragment).collect();
        self.index = Some(SchemaIndex::build(embedder, &fragments, top_k).await?);
        Ok(())
    }

    pub fn table_names(&self) -> &[String] {
        &self.table_names
    }

    pub fn full_schema(&self) -> &str {
        &self.full_schema
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Human-readable one-liner about what the database contains.
    pub fn database_summary(&self) -> String {
        format!(
            "This database contains the following tables: {}.",
            self.table_names.join(", ")
        )
    }

    /// Schema text for a subset of tables. Unknown names are skipped.
    pub fn schema_subset(&self, names: &[String]) -> String {
        self.tables
            .iter()
            .filter(|t| names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)))
            .map(TableInfo::fragment)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `{table: [{name, type}, ...]}` for the schema API endpoint.
    pub fn structured_schema(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for table in &self.tables {
            let cols: Vec<serde_json::Value> = table
                .columns
                .iter()
                .map(|c| json!({ "name": c.name, "type": c.ty }))
                .collect();
            out.insert(table.name.clone(), json!(cols));
        }
        serde_json::Value::Object(out)
    }

    /// Resolve a (table, column) pair proposed by the model against the real
    /// catalog, returning canonical names. Guards identifier interpolation.
    fn resolve_column(&self, table: &str, column: &str) -> Option<(String, String)> {
        let table_info = self
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))?;
        let col = table_info
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))?;
        Some((table_info.name.clone(), col.name.clone()))
    }

    /// Distinct values in a column matching `term` (case-insensitive
    /// substring), capped at `limit`. Never fails: unknown identifiers or
    /// query errors return an empty list.
    pub async fn lookup_values(
        &self,
        table: &str,
        column: &str,
        term: &str,
        limit: usize,
    ) -> Vec<String> {
        let Some((table, column)) = self.resolve_column(table, column) else {
            warn!(table, column, "lookup skipped: unknown table/column");
            return vec![];
        };

        let sql = format!(
            "SELECT DISTINCT \"{column}\" FROM \"{table}\" WHERE \"{column}\" LIKE $1 LIMIT $2"
        );
        let result = sqlx::query(&sql)
            .bind(format!("%{term}%"))
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await;

        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.try_get::<String, _>(0).ok())
                .collect(),
            Err(e) => {
                warn!(%table, %column, "lookup failed: {e}");
                vec![]
            }
        }
    }
}
