// src/agent/workflow.rs
// The orchestration graph: entry at Understand, conditional routing after
// Understand and Execute, a bounded generate/execute repair loop, terminal
// branches for rejection, clarification, meta-queries, and answers.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::state::{ChartSpec, LogEntry, QuerySession};
use crate::db::{Database, ResultTable};
use crate::llm::TextModel;
use crate::schema::SchemaProvider;

/// Retry ceiling for the generate/execute loop.
pub const MAX_RETRIES: u32 = 3;

/// Tunables the composition root hands the workflow. Defaults match the
/// config defaults so tests can construct a workflow without environment.
#[derive(Debug, Clone)]
pub struct WorkflowLimits {
    pub max_sql_retries: u32,
    pub max_chart_points: usize,
    pub explore_entity_cap: usize,
    pub lookup_value_limit: usize,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_sql_retries: MAX_RETRIES,
            max_chart_points: 20,
            explore_entity_cap: 3,
            lookup_value_limit: 10,
        }
    }
}

/// Stages of the graph. Terminal stages route to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Understand,
    RejectIrrelevant,
    MetaQuery,
    AskClarification,
    GetSchema,
    ExploreData,
    Plan,
    GenerateSql,
    Execute,
    GenerateVisualization,
    GenerateAnswer,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Understand => "understand",
            Stage::RejectIrrelevant => "reject_irrelevant",
            Stage::MetaQuery => "meta_query",
            Stage::AskClarification => "ask_clarification",
            Stage::GetSchema => "get_schema",
            Stage::ExploreData => "explore_data",
            Stage::Plan => "plan",
            Stage::GenerateSql => "generate_sql",
            Stage::Execute => "execute",
            Stage::GenerateVisualization => "generate_visualization",
            Stage::GenerateAnswer => "generate_answer",
        }
    }
}

/// Incremental notifications for the streaming caller surface, emitted in
/// stage-completion order by the same loop that drives run-to-completion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    Step {
        stage: &'static str,
        logs: Vec<LogEntry>,
    },
    Result(ResultTable),
    Visualization(ChartSpec),
    Answer(String),
    Error(String),
    Done {
        success: bool,
    },
}

pub struct Workflow {
    pub(crate) model: Arc<dyn TextModel>,
    pub(crate) db: Database,
    pub(crate) schema: Arc<SchemaProvider>,
    pub(crate) limits: WorkflowLimits,
}

impl Workflow {
    pub fn new(model: Arc<dyn TextModel>, db: Database, schema: Arc<SchemaProvider>) -> Self {
        Self {
            model,
            db,
            schema,
            limits: WorkflowLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: WorkflowLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run a question to its terminal state.
    pub async fn run(&self, question: impl Into<String>) -> QuerySession {
        self.run_inner(question.into(), None).await
    }

    /// Run a question, emitting one event per completed stage plus the
    /// terminal result/answer/error events. Send failures (a caller that
    /// hung up) are ignored; the session still runs to completion.
    pub async fn run_with_events(
        &self,
        question: impl Into<String>,
        events: mpsc::Sender<AgentEvent>,
    ) -> QuerySession {
        self.run_inner(question.into(), Some(&events)).await
    }

    async fn run_inner(
        &self,
        question: String,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> QuerySession {
        let session_id = uuid::Uuid::new_v4();
        info!(%session_id, question = %question, "session started");
        let mut state = QuerySession::new(question);
        let mut stage = Stage::Understand;

        loop {
            debug!(stage = stage.label(), "entering stage");
            let logs_before = state.logs.len();
            let update = self.apply_stage(stage, &state).await;
            state.apply(update);

            if let Some(tx) = events {
                let _ = tx
                    .send(AgentEvent::Step {
                        stage: stage.label(),
                        logs: state.logs[logs_before..].to_vec(),
                    })
                    .await;
            }

            match self.next_stage(stage, &state) {
                Some(next) => stage = next,
                None => break,
            }
        }

        if let Some(tx) = events {
            if let Some(results) = &state.results {
                let _ = tx.send(AgentEvent::Result(results.clone())).await;
            }
            if let Some(chart) = &state.visualization {
                let _ = tx.send(AgentEvent::Visualization(chart.clone())).await;
            }
            if let Some(answer) = &state.final_answer {
                let _ = tx.send(AgentEvent::Answer(answer.clone())).await;
            }
            if let Some(error) = &state.error {
                let _ = tx.send(AgentEvent::Error(error.clone())).await;
            }
            let _ = tx
                .send(AgentEvent::Done {
                    success: state.succeeded(),
                })
                .await;
        }

        info!(
            %session_id,
            success = state.succeeded(),
            attempts = state.attempts,
            "session finished"
        );
        state
    }

    fn next_stage(&self, stage: Stage, state: &QuerySession) -> Option<Stage> {
        next_stage(stage, state, self.limits.max_sql_retries)
    }
}

/// Routing table. `None` means the stage is terminal.
pub fn next_stage(stage: Stage, state: &QuerySession, max_sql_retries: u32) -> Option<Stage> {
    use super::state::Intent;

    match stage {
        Stage::Understand => Some(match state.intent {
            Some(Intent::Irrelevant) => Stage::RejectIrrelevant,
            Some(Intent::MetaQuery) => Stage::MetaQuery,
            _ if !state.ambiguity.is_empty() => Stage::AskClarification,
            _ => Stage::GetSchema,
        }),
        Stage::GetSchema => Some(Stage::ExploreData),
        Stage::ExploreData => Some(Stage::Plan),
        Stage::Plan => Some(Stage::GenerateSql),
        Stage::GenerateSql => Some(Stage::Execute),
        Stage::Execute => {
            if state.error.is_some() {
                if state.attempts >= max_sql_retries {
                    None // retry budget exhausted
                } else {
                    Some(Stage::GenerateSql) // repair mode
                }
            } else {
                Some(Stage::GenerateVisualization)
            }
        }
        Stage::GenerateVisualization => Some(Stage::GenerateAnswer),
        Stage::RejectIrrelevant
        | Stage::MetaQuery
        | Stage::AskClarification
        | Stage::GenerateAnswer => None,
    }
}
