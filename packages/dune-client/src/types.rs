use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Response to triggering a query execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionTriggered {
    pub execution_id: String,
    pub state: String,
}

/// Execution status as reported by the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: String,
    pub state: String,
    #[serde(default)]
    pub execution_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_ended_at: Option<DateTime<Utc>>,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state.as_str(),
            "QUERY_STATE_COMPLETED" | "QUERY_STATE_FAILED" | "QUERY_STATE_CANCELLED"
        )
    }
}

/// Result envelope returned by the results endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionResults<T> {
    pub execution_id: String,
    pub state: String,
    pub result: ResultSet<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultSet<T> {
    pub rows: Vec<T>,
}

/// A row of the subplebbit-discovery query. The warehouse reports forum
/// names; everything else in the row is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SubplebbitRow {
    pub name: Option<String>,
}
