// src/agent/stages.rs
// Stage handlers. Each one reads an immutable snapshot of the session and
// returns a partial update; the orchestrator does the merging. Model and
// database calls are the only suspension points, and every failure becomes
// state instead of propagating.

use serde::Deserialize;
use tracing::{debug, warn};

use super::state::{
    ChartSpec, Complexity, ErrorUpdate, Intent, LogEntry, LogKind, QuerySession, StageUpdate,
};
use super::validator::validate_sql;
use super::workflow::{Stage, Workflow};
use crate::db::ResultTable;
use crate::llm::parse::{extract_sql, parse_json_response};

/// Shape of the Understand stage's structured completion.
#[derive(Debug, Deserialize)]
struct Understanding {
    intent: Option<Intent>,
    complexity: Option<Complexity>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    ambiguity: Vec<String>,
    #[serde(default)]
    rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityMapping {
    table: String,
    column: String,
}

#[derive(Debug, Deserialize)]
struct ChartProposal {
    chart_type: String,
    label_column: String,
    value_column: String,
}

impl Workflow {
    pub(crate) async fn apply_stage(&self, stage: Stage, state: &QuerySession) -> StageUpdate {
        match stage {
            Stage::Understand => self.understand(state).await,
            Stage::RejectIrrelevant => self.reject_irrelevant(state),
            Stage::MetaQuery => self.meta_query(state).await,
            Stage::AskClarification => self.ask_clarification(state).await,
            Stage::GetSchema => self.get_schema(state).await,
            Stage::ExploreData => self.explore_data(state).await,
            Stage::Plan => self.plan(state).await,
            Stage::GenerateSql => self.generate_sql(state).await,
            Stage::Execute => self.execute(state).await,
            Stage::GenerateVisualization => self.generate_visualization(state).await,
            Stage::GenerateAnswer => self.generate_answer(state).await,
        }
    }

    /// Classify intent and complexity. Malformed output falls back to a
    /// default classification; this stage never fails the session.
    async fn understand(&self, state: &QuerySession) -> StageUpdate {
        let prompt = format!(
            r#"You are a SQL expert AI. Analyze the user question against a relational database.

The database has these tables: {tables}

Return a JSON object with:
- "intent": "aggregation", "filtering", "join", "meta-query", "irrelevant", or "general"
  * "meta-query": the user asks about tables, columns, or schema structure (e.g. "Show tables").
  * "irrelevant": the question has nothing to do with this database.
- "complexity": "simple", "moderate", or "complex"
- "entities": list of table names or entities mentioned or implied
- "ambiguity": list of ambiguous terms that need clarification (e.g. "best", "recent" without criteria)
- "rejection_reason": short reason, only when intent is "irrelevant"

Question: "{question}"

Return ONLY valid JSON."#,
            tables = self.schema.table_names().join(", "),
            question = state.question
        );

        let fallback = |detail: String| StageUpdate {
            intent: Some(Intent::General),
            complexity: Some(Complexity::Moderate),
            ..Default::default()
        }
        .log(LogEntry::new("Understanding Error", detail, LogKind::Error));

        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => return fallback(e.to_string()),
        };

        match parse_json_response::<Understanding>(&raw) {
            Ok(u) => {
                let intent = u.intent.unwrap_or(Intent::General);
                let complexity = u.complexity.unwrap_or(Complexity::Moderate);
                StageUpdate {
                    intent: Some(intent),
                    complexity: Some(complexity),
                    entities: Some(u.entities),
                    ambiguity: Some(u.ambiguity),
                    // set iff the question was judged irrelevant
                    rejection_reason: (intent == Intent::Irrelevant)
                        .then_some(u.rejection_reason)
                        .flatten(),
                    ..Default::default()
                }
                .log(LogEntry::new(
                    "Understanding",
                    format!(
                        "Intent: {}\nComplexity: {}",
                        intent.as_str(),
                        complexity.as_str()
                    ),
                    LogKind::Analysis,
                ))
            }
            Err(e) => fallback(format!("could not parse classification: {e}")),
        }
    }

    /// Resolve the schema subset relevant to the question.
    async fn get_schema(&self, state: &QuerySession) -> StageUpdate {
        let complexity = state.complexity.unwrap_or(Complexity::Moderate);
        let schema = self
            .schema
            .relevant_schema(&state.question, complexity, self.model.as_ref())
            .await;

        let tables: Vec<&str> = schema
            .lines()
            .filter(|l| l.starts_with("Table:"))
            .collect();

        StageUpdate {
            relevant_schema: Some(schema.clone()),
            ..Default::default()
        }
        .log(LogEntry::new(
            "Relevant Schema",
            tables.join("\n"),
            LogKind::Schema,
        ))
    }

    /// Ground extracted entities against actual column values. Advisory
    /// evidence only: failures are logged and skipped, never fatal.
    async fn explore_data(&self, state: &QuerySession) -> StageUpdate {
        if state.entities.is_empty() {
            return StageUpdate::default();
        }

        let schema = state.relevant_schema.as_deref().unwrap_or_default();
        let mut findings = Vec::new();

        for entity in state.entities.iter().take(self.limits.explore_entity_cap) {
            let prompt = format!(
                r#"Schema:
{schema}

The term "{entity}" appears in a user question. Which (table, column) most likely holds values matching it?

Return ONLY JSON: {{"table": "...", "column": "..."}}"#
            );

            let raw = match self.model.complete(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(%entity, "entity mapping call failed: {e}");
                    continue;
                }
            };
            let Ok(mapping) = parse_json_response::<EntityMapping>(&raw) else {
                debug!(%entity, "entity mapping was not parseable");
                continue;
            };

            let values = self
                .schema
                .lookup_values(
                    &mapping.table,
                    &mapping.column,
                    entity,
                    self.limits.lookup_value_limit,
                )
                .await;

            if values.is_empty() {
                findings.push(format!(
                    "'{entity}': no matching values in {}.{}",
                    mapping.table, mapping.column
                ));
            } else {
                findings.push(format!(
                    "'{entity}' -> {}.{}: {}",
                    mapping.table,
                    mapping.column,
                    values.join(", ")
                ));
            }
        }

        if findings.is_empty() {
            StageUpdate::default()
        } else {
            StageUpdate::default().log(LogEntry::new(
                "Data Exploration",
                findings.join("\n"),
                LogKind::Info,
            ))
        }
    }

    /// Produce a numbered plan for moderate/complex questions. Advisory
    /// text only; simple questions skip straight to generation.
    async fn plan(&self, state: &QuerySession) -> StageUpdate {
        if state.complexity == Some(Complexity::Simple) {
            return StageUpdate::default();
        }

        let prompt = format!(
            r#"You are a Query Planner for a text-to-SQL system.
Break the user's question into logical steps before SQL is written.

Database Schema:
{schema}

User Question: "{question}"

Create a step-by-step plan. For each step, identify what data is needed,
which table(s) to access, and any conditions or filters.

Return ONLY the numbered plan."#,
            schema = state.relevant_schema.as_deref().unwrap_or_default(),
            question = state.question
        );

        match self.model.complete(&prompt).await {
            Ok(text) => {
                let plan = text.trim().to_string();
                StageUpdate {
                    plan: Some(plan.clone()),
                    ..Default::default()
                }
                .log(LogEntry::new("Query Plan", plan, LogKind::Plan))
            }
            Err(e) => {
                // plan is advisory, generation proceeds without one
                StageUpdate::default().log(LogEntry::new(
                    "Planning Error",
                    e.to_string(),
                    LogKind::Error,
                ))
            }
        }
    }

    /// Generate a new query, or repair the previous one when the session
    /// carries an error. A capability failure becomes session state so the
    /// orchestrator can route to termination through the normal path.
    async fn generate_sql(&self, state: &QuerySession) -> StageUpdate {
        let schema = state.relevant_schema.as_deref().unwrap_or_default();
        let mut update = StageUpdate::default();

        let repairing = state.error.is_some();
        let completion = if let Some(error) = &state.error {
            update.logs.push(LogEntry::new(
                format!("Error (Attempt {})", state.attempts),
                error.clone(),
                LogKind::Error,
            ));

            let prompt = format!(
                r#"You are fixing a broken SQL query for SQLite.

Database Schema:
{schema}

User Question: "{question}"

Previous Failed SQL:
{prev_sql}

Error Message:
{error}

Correct the SQL query to resolve the error. Ensure the logic still matches
the user's question and the schema.

Return ONLY the corrected SQL. No markdown formatting."#,
                question = state.question,
                prev_sql = state.sql.as_deref().unwrap_or("(none)"),
            );
            self.model.complete(&prompt).await
        } else {
            let prompt = format!(
                r#"You are a SQL expert for SQLite. Generate a safe and efficient query.

Database Schema:
{schema}

User Question: "{question}"

Query Plan:
{plan}

Constraints & Guidelines:
1. READ-ONLY: SELECT statements only.
2. SAFETY: Add a LIMIT 1000 clause if the query might return many rows, unless an explicit aggregation (COUNT, MAX, ...) is requested.
3. CLARITY: Use Common Table Expressions (CTEs) for complex logic.
4. COLUMN SELECTION: Avoid SELECT *. Explicitly select the columns needed.

Return ONLY the SQL query. No markdown formatting."#,
                question = state.question,
                plan = state.plan.as_deref().unwrap_or("No specific plan provided."),
            );
            self.model.complete(&prompt).await
        };

        match completion {
            Ok(text) => {
                let sql = extract_sql(&text);
                let title = if repairing { "Fixed SQL" } else { "Generated SQL" };
                update.sql = Some(sql.clone());
                update.error = ErrorUpdate::Cleared;
                update.logs.push(LogEntry::new(title, sql, LogKind::Sql));
            }
            Err(e) => {
                let message = format!("LLM generation error: {e}");
                update.error = ErrorUpdate::Raised(message.clone());
                update
                    .logs
                    .push(LogEntry::new("Generation Error", message, LogKind::Error));
            }
        }

        update
    }

    /// Validate then execute the candidate query. Both failure paths count
    /// one attempt and leave `sql` in place for the repair pass.
    async fn execute(&self, state: &QuerySession) -> StageUpdate {
        let candidate = state.sql.as_deref().unwrap_or_default();

        let statement = match validate_sql(candidate) {
            Ok(statement) => statement,
            Err(reason) => {
                return StageUpdate {
                    error: ErrorUpdate::Raised(format!("Validation failed: {reason}")),
                    attempt_failed: true,
                    ..Default::default()
                };
            }
        };

        match self.db.select(&statement).await {
            Ok(table) => StageUpdate {
                results: Some(table.clone()),
                error: ErrorUpdate::Cleared,
                ..Default::default()
            }
            .log(LogEntry::new(
                "Execution Success",
                format!("Rows: {}", table.data_row_count()),
                LogKind::Success,
            )),
            Err(e) => StageUpdate {
                error: ErrorUpdate::Raised(e.to_string()),
                attempt_failed: true,
                ..Default::default()
            },
        }
    }

    /// Best-effort chart building. The model proposes columns; the mapping
    /// back to indices happens here, outside the model. Any mismatch means
    /// no chart, never a failed session.
    async fn generate_visualization(&self, state: &QuerySession) -> StageUpdate {
        match self.build_chart(state).await {
            Some(chart) => {
                let summary = format!(
                    "{} chart with {} points",
                    chart.chart_type,
                    chart.values.len()
                );
                StageUpdate {
                    visualization: Some(chart),
                    ..Default::default()
                }
                .log(LogEntry::new("Visualization", summary, LogKind::Info))
            }
            None => StageUpdate::default(),
        }
    }

    async fn build_chart(&self, state: &QuerySession) -> Option<ChartSpec> {
        let results = state.results.as_ref()?;
        // nothing worth plotting below header + one data row
        if results.total_len() < 2 {
            return None;
        }

        let sample: Vec<&Vec<serde_json::Value>> = results.rows.iter().take(3).collect();
        let prompt = format!(
            r#"Query results have these columns: {columns}

Sample rows:
{sample}

Propose a chart for these results. Pick one categorical/label column and one numeric value column.

Return ONLY JSON: {{"chart_type": "bar" | "line" | "pie", "label_column": "...", "value_column": "..."}}"#,
            columns = results.columns.join(", "),
            sample = serde_json::to_string(&sample).unwrap_or_default(),
        );

        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("visualization call failed: {e}");
                return None;
            }
        };
        let proposal: ChartProposal = match parse_json_response(&raw) {
            Ok(p) => p,
            Err(e) => {
                debug!("chart proposal was not parseable: {e}");
                return None;
            }
        };

        let column_index = |name: &str| {
            results
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
        };
        let label_idx = column_index(&proposal.label_column)?;
        let value_idx = column_index(&proposal.value_column)?;

        let mut labels = Vec::new();
        let mut values = Vec::new();
        for row in results.rows.iter().take(self.limits.max_chart_points) {
            let label = match row.get(label_idx)? {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let value = row.get(value_idx)?.as_f64()?;
            labels.push(label);
            values.push(value);
        }

        Some(ChartSpec {
            chart_type: proposal.chart_type.to_lowercase(),
            title: state.question.clone(),
            labels,
            values,
        })
    }

    /// Synthesize a one-sentence answer for small result sets. Large sets
    /// are left to tabular presentation so the model never sees a big
    /// payload and latency stays bounded.
    async fn generate_answer(&self, state: &QuerySession) -> StageUpdate {
        let Some(results) = state.results.as_ref().filter(|r| r.data_row_count() > 0) else {
            return StageUpdate {
                final_answer: Some("No results found.".to_string()),
                ..Default::default()
            };
        };
        if results.data_row_count() > 2 {
            return StageUpdate::default();
        }
        let preview = serde_json::json!({
            "columns": results.columns,
            "rows": results.rows,
        });
        let prompt = format!(
            r#"Summarize the SQL results for the user in one natural sentence.

Question: {question}
Results: {preview}"#,
            question = state.question,
        );

        let answer = match self.model.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("answer synthesis failed: {e}");
                "Here are the results (summary unavailable).".to_string()
            }
        };

        StageUpdate {
            final_answer: Some(answer),
            ..Default::default()
        }
    }

    /// Ask one clarifying question grounded in what the database actually
    /// contains.
    async fn ask_clarification(&self, state: &QuerySession) -> StageUpdate {
        let prompt = format!(
            r#"{summary}

A user asked: "{question}"

These terms are ambiguous: {terms}

Ask ONE short clarifying question. Only reference entities that actually
exist in this database. Return only the question itself."#,
            summary = self.schema.database_summary(),
            question = state.question,
            terms = state.ambiguity.join(", "),
        );

        let question = match self.model.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("clarification call failed: {e}");
                format!(
                    "Your question contains some ambiguity ({}). Could you restate it with more specific criteria?",
                    state.ambiguity.join(", ")
                )
            }
        };

        StageUpdate {
            final_answer: Some(question.clone()),
            ..Default::default()
        }
        .log(LogEntry::new("Clarification Needed", question, LogKind::Info))
    }

    /// Fixed-template refusal. No model call: the table list and example
    /// questions are enough.
    fn reject_irrelevant(&self, state: &QuerySession) -> StageUpdate {
        let mut message = String::new();
        if let Some(reason) = &state.rejection_reason {
            message.push_str(reason);
            message.push(' ');
        }
        message.push_str(&format!(
            "I can only answer questions about this database. It contains the following tables: {}. \
             Try asking something like \"How many tracks are there?\" or \"Which customers are from Brazil?\"",
            self.schema.table_names().join(", ")
        ));

        StageUpdate {
            final_answer: Some(message.clone()),
            ..Default::default()
        }
        .log(LogEntry::new("Rejected", message, LogKind::Result))
    }

    /// Answer a question about the database structure itself with one
    /// model-written introspection SELECT; fall back to the canned table
    /// list when the model or the execution fails.
    async fn meta_query(&self, state: &QuerySession) -> StageUpdate {
        let answer = match self.introspect(state).await {
            Some(text) => text,
            None => format!(
                "Here are the tables in the database:\n{}",
                self.schema.table_names().join(", ")
            ),
        };

        StageUpdate {
            final_answer: Some(answer.clone()),
            ..Default::default()
        }
        .log(LogEntry::new("Meta-Query Result", answer, LogKind::Result))
    }

    async fn introspect(&self, state: &QuerySession) -> Option<String> {
        let prompt = format!(
            r#"Translate this question about a SQLite database's structure into ONE introspection SELECT statement over sqlite_master and/or pragma_table_info(...).

Question: "{question}"

Rules:
- Exactly one SELECT statement, nothing else.
- Filter out internal tables (names starting with 'sqlite_').

Return ONLY the SQL."#,
            question = state.question
        );

        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("meta-query generation failed: {e}");
                return None;
            }
        };

        // same validator as the main loop: truncate at the first semicolon,
        // SELECT-shaped, no forbidden keywords
        let statement = match validate_sql(&extract_sql(&raw)) {
            Ok(statement) => statement,
            Err(reason) => {
                warn!("meta-query rejected: {reason}");
                return None;
            }
        };

        match self.db.select(&statement).await {
            Ok(table) => Some(format_table_text(&table)),
            Err(e) => {
                warn!("meta-query execution failed: {e}");
                None
            }
        }
    }
}

/// Plain-text rendering of a small result table for meta answers.
fn format_table_text(table: &ResultTable) -> String {
    if table.rows.is_empty() {
        return "(no rows)".to_string();
    }
    let cell = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if table.columns.len() == 1 {
        table
            .rows
            .iter()
            .filter_map(|r| r.first().map(&cell))
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        table
            .rows
            .iter()
            .map(|r| r.iter().map(&cell).collect::<Vec<_>>().join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
