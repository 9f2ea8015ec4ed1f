//! Pure Dune Analytics REST API client.
//!
//! A minimal client for the Dune API. Supports triggering query executions,
//! polling for completion, and fetching result rows.
//!
//! # Example
//!
//! ```rust,ignore
//! use dune_client::DuneClient;
//!
//! let client = DuneClient::new("your-api-key".into());
//!
//! let rows = client.run_query::<SubplebbitRow>(3456789).await?;
//! for row in &rows {
//!     println!("{}", row.name.as_deref().unwrap_or("(unnamed)"));
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{DuneError, Result};
pub use types::{ExecutionResults, ExecutionStatus, ExecutionTriggered, SubplebbitRow};

use std::time::Duration;

use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://api.dune.com/api/v1";

/// Interval between status polls while an execution is pending.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct DuneClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DuneClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Trigger an execution of a saved query. Returns immediately with the
    /// execution id.
    pub async fn execute_query(&self, query_id: u64) -> Result<ExecutionTriggered> {
        let url = format!("{}/query/{}/execute", self.base_url, query_id);
        let resp = self
            .client
            .post(&url)
            .header("X-Dune-API-Key", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DuneError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    /// Poll until an execution reaches a terminal state.
    pub async fn wait_for_execution(&self, execution_id: &str) -> Result<ExecutionStatus> {
        loop {
            let url = format!("{}/execution/{}/status", self.base_url, execution_id);
            let resp = self
                .client
                .get(&url)
                .header("X-Dune-API-Key", &self.api_key)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(DuneError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let execution: ExecutionStatus = resp.json().await?;
            if execution.is_terminal() {
                if execution.state == "QUERY_STATE_COMPLETED" {
                    return Ok(execution);
                }
                return Err(DuneError::ExecutionFailed(execution.state));
            }

            tracing::debug!(execution_id, state = %execution.state, "Execution still in progress");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Fetch result rows from a completed execution.
    pub async fn get_execution_results<T: DeserializeOwned>(
        &self,
        execution_id: &str,
    ) -> Result<Vec<T>> {
        let url = format!("{}/execution/{}/results", self.base_url, execution_id);
        let resp = self
            .client
            .get(&url)
            .header("X-Dune-API-Key", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DuneError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let results: ExecutionResults<T> = resp.json().await?;
        Ok(results.result.rows)
    }

    /// Run a saved query end-to-end: trigger, poll, fetch rows.
    pub async fn run_query<T: DeserializeOwned>(&self, query_id: u64) -> Result<Vec<T>> {
        tracing::info!(query_id, "Triggering Dune query execution");

        let triggered = self.execute_query(query_id).await?;
        tracing::info!(execution_id = %triggered.execution_id, "Execution started, polling for completion");

        let completed = self.wait_for_execution(&triggered.execution_id).await?;
        tracing::info!(
            execution_id = %completed.execution_id,
            "Execution completed, fetching results"
        );

        let rows: Vec<T> = self.get_execution_results(&completed.execution_id).await?;
        tracing::info!(count = rows.len(), "Fetched query result rows");

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let status = |state: &str| ExecutionStatus {
            execution_id: "01HX".into(),
            state: state.into(),
            execution_started_at: None,
            execution_ended_at: None,
        };

        assert!(status("QUERY_STATE_COMPLETED").is_terminal());
        assert!(status("QUERY_STATE_FAILED").is_terminal());
        assert!(status("QUERY_STATE_CANCELLED").is_terminal());
        assert!(!status("QUERY_STATE_PENDING").is_terminal());
        assert!(!status("QUERY_STATE_EXECUTING").is_terminal());
    }

    #[test]
    fn result_rows_deserialize() {
        let body = r#"{
            "execution_id": "01HX",
            "state": "QUERY_STATE_COMPLETED",
            "result": { "rows": [{ "name": "memes.eth" }, { "name": null }] }
        }"#;

        let parsed: ExecutionResults<SubplebbitRow> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.rows.len(), 2);
        assert_eq!(parsed.result.rows[0].name.as_deref(), Some("memes.eth"));
        assert!(parsed.result.rows[1].name.is_none());
    }
}
