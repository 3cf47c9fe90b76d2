// src/server/types.rs

use serde::{Deserialize, Serialize};

use crate::agent::{ChartSpec, LogEntry, QuerySession};
use crate::db::ResultTable;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// Run-to-completion response body. Session failures land here as
/// `success: false`, never as an HTTP error.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natural_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<ChartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<LogEntry>,
}

impl From<QuerySession> for QueryResponse {
    fn from(session: QuerySession) -> Self {
        Self {
            success: session.succeeded(),
            result: session.results,
            natural_answer: session.final_answer,
            visualization: session.visualization,
            error: session.error,
            steps: session.logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_session_maps_to_unsuccessful_response() {
        let mut session = QuerySession::new("q");
        session.error = Some("no such table".to_string());
        let response = QueryResponse::from(session);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("no such table"));
    }
}
