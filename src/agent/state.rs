// src/agent/state.rs
// The session record threaded through the orchestration graph, and the
// partial-update value stages return. Stages never mutate shared state;
// the orchestrator merges updates with the rules defined here.

use serde::{Deserialize, Serialize};

use crate::db::ResultTable;

/// Query intent, as classified by the Understand stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Aggregation,
    Filtering,
    Join,
    MetaQuery,
    Irrelevant,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Aggregation => "aggregation",
            Intent::Filtering => "filtering",
            Intent::Join => "join",
            Intent::MetaQuery => "meta-query",
            Intent::Irrelevant => "irrelevant",
            Intent::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// Audit-trail entry kind, mirrored to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Analysis,
    Schema,
    Plan,
    Sql,
    Success,
    Error,
    Result,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub title: String,
    pub content: String,
    pub kind: LogKind,
}

impl LogEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>, kind: LogKind) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            kind,
        }
    }
}

/// Chart payload built from a successful result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: String,
    pub title: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// One question's session state.
///
/// Created once per incoming question, advanced by structural merge
/// (`apply`), discarded after the terminal stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuerySession {
    pub question: String,
    pub intent: Option<Intent>,
    pub complexity: Option<Complexity>,
    pub entities: Vec<String>,
    pub ambiguity: Vec<String>,
    pub rejection_reason: Option<String>,
    pub relevant_schema: Option<String>,
    pub plan: Option<String>,
    pub sql: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub results: Option<ResultTable>,
    pub visualization: Option<ChartSpec>,
    pub final_answer: Option<String>,
    pub logs: Vec<LogEntry>,
}

impl QuerySession {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// A session succeeded when it reached a terminal stage without a
    /// standing error (exhausted retry loops leave the last error in place).
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Merge a stage's partial update. Every field has exactly one rule:
    /// `Some` overwrites, `None` keeps; `error` is tri-state; `attempts`
    /// grows by at most one; `logs` is append-only.
    pub fn apply(&mut self, update: StageUpdate) {
        if let Some(v) = update.intent {
            self.intent = Some(v);
        }
        if let Some(v) = update.complexity {
            self.complexity = Some(v);
        }
        if let Some(v) = update.entities {
            self.entities = v;
        }
        if let Some(v) = update.ambiguity {
            self.ambiguity = v;
        }
        if let Some(v) = update.rejection_reason {
            self.rejection_reason = Some(v);
        }
        if let Some(v) = update.relevant_schema {
            self.relevant_schema = Some(v);
        }
        if let Some(v) = update.plan {
            self.plan = Some(v);
        }
        if let Some(v) = update.sql {
            self.sql = Some(v);
        }
        match update.error {
            ErrorUpdate::Unchanged => {}
            ErrorUpdate::Cleared => self.error = None,
            ErrorUpdate::Raised(e) => self.error = Some(e),
        }
        if update.attempt_failed {
            self.attempts += 1;
        }
        if let Some(v) = update.results {
            self.results = Some(v);
        }
        if let Some(v) = update.visualization {
            self.visualization = Some(v);
        }
        if let Some(v) = update.final_answer {
            self.final_answer = Some(v);
        }
        self.logs.extend(update.logs);
    }
}

/// Tri-state merge rule for the session error slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ErrorUpdate {
    #[default]
    Unchanged,
    Cleared,
    Raised(String),
}

/// Partial state returned by a stage handler.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub intent: Option<Intent>,
    pub complexity: Option<Complexity>,
    pub entities: Option<Vec<String>>,
    pub ambiguity: Option<Vec<String>>,
    pub rejection_reason: Option<String>,
    pub relevant_schema: Option<String>,
    pub plan: Option<String>,
    pub sql: Option<String>,
    pub error: ErrorUpdate,
    pub attempt_failed: bool,
    pub results: Option<ResultTable>,
    pub visualization: Option<ChartSpec>,
    pub final_answer: Option<String>,
    pub logs: Vec<LogEntry>,
}

impl StageUpdate {
    pub fn log(mut self, entry: LogEntry) -> Self {
        self.logs.push(entry);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_are_appended_never_replaced() {
        let mut state = QuerySession::new("q");
        state.apply(StageUpdate::default().log(LogEntry::new("a", "1", LogKind::Info)));
        state.apply(StageUpdate::default().log(LogEntry::new("b", "2", LogKind::Info)));
        let titles: Vec<&str> = state.logs.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["a", "b"]);
    }

    #[test]
    fn error_is_tri_state() {
        let mut state = QuerySession::new("q");
        state.apply(StageUpdate {
            error: ErrorUpdate::Raised("boom".to_string()),
            ..Default::default()
        });
        assert_eq!(state.error.as_deref(), Some("boom"));

        // Unchanged keeps the standing error
        state.apply(StageUpdate::default());
        assert_eq!(state.error.as_deref(), Some("boom"));

        state.apply(StageUpdate {
            error: ErrorUpdate::Cleared,
            ..Default::default()
        });
        assert!(state.error.is_none());
    }

    #[test]
    fn attempts_grow_by_at_most_one_per_update() {
        let mut state = QuerySession::new("q");
        state.apply(StageUpdate {
            attempt_failed: true,
            ..Default::default()
        });
        state.apply(StageUpdate::default());
        state.apply(StageUpdate {
            attempt_failed: true,
            ..Default::default()
        });
        assert_eq!(state.attempts, 2);
    }

    #[test]
    fn none_fields_keep_prior_values() {
        let mut state = QuerySession::new("q");
        state.apply(StageUpdate {
            sql: Some("SELECT 1".to_string()),
            ..Default::default()
        });
        state.apply(StageUpdate::default());
        assert_eq!(state.sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn intent_serde_uses_kebab_case() {
        assert_eq!(
            serde_json::from_str::<Intent>("\"meta-query\"").unwrap(),
            Intent::MetaQuery
        );
        assert_eq!(serde_json::to_string(&Intent::MetaQuery).unwrap(), "\"meta-query\"");
    }
}
