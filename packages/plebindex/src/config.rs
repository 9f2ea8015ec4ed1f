//! Environment-driven configuration.
//!
//! Everything the binary needs comes from environment variables (loaded via
//! `dotenvy` in main). Required keys fail loudly with context; the rest have
//! defaults suitable for a local gateway.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default raw URL of the curated subplebbit list.
const DEFAULT_GITHUB_LIST_URL: &str =
    "https://raw.githubusercontent.com/plebbit/temporary-default-subplebbits/master/multisub.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub gateway_url: String,
    pub github_list_url: String,
    /// Absent key disables the analytics source only.
    pub dune_api_key: Option<String>,
    pub dune_query_id: u64,
    /// Absent key disables the moderation cascade.
    pub classifier_api_key: Option<String>,
    pub classifier_base_url: Option<String>,
    /// Prioritized classifier models (A, B, C).
    pub classifier_models: Vec<String>,
    pub blacklisted_subplebbits: HashSet<String>,
    pub blacklisted_authors: HashSet<String>,
    /// Run the cascade synchronously on update-listener content.
    pub moderate_on_update: bool,
    /// Wall-clock budget per network call.
    pub fetch_timeout: Duration,
    pub queue_batch_size: i64,
    pub moderation_batch_size: i64,
    /// 6-field cron expressions (seconds first).
    pub discovery_schedule: String,
    pub queue_schedule: String,
    pub moderation_schedule: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let gateway_url = std::env::var("PLEBBIT_GATEWAY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9138".to_string());
        let github_list_url = std::env::var("GITHUB_LIST_URL")
            .unwrap_or_else(|_| DEFAULT_GITHUB_LIST_URL.to_string());

        let dune_api_key = std::env::var("DUNE_API_KEY").ok().filter(|v| !v.is_empty());
        let dune_query_id = std::env::var("DUNE_QUERY_ID")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u64>()
            .context("DUNE_QUERY_ID must be an integer")?;

        let classifier_api_key = std::env::var("CLASSIFIER_API_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        let classifier_base_url = std::env::var("CLASSIFIER_BASE_URL").ok();
        let classifier_models = csv_env("CLASSIFIER_MODELS");

        let blacklisted_subplebbits = csv_env("BLACKLISTED_SUBPLEBBITS").into_iter().collect();
        let blacklisted_authors = csv_env("BLACKLISTED_AUTHORS").into_iter().collect();

        let moderate_on_update = std::env::var("MODERATE_ON_UPDATE")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let fetch_timeout_secs = std::env::var("FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse::<u64>()
            .context("FETCH_TIMEOUT_SECS must be an integer")?;

        let queue_batch_size = std::env::var("QUEUE_BATCH_SIZE")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<i64>()
            .context("QUEUE_BATCH_SIZE must be an integer")?;

        let moderation_batch_size = std::env::var("MODERATION_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<i64>()
            .context("MODERATION_BATCH_SIZE must be an integer")?;

        let discovery_schedule =
            std::env::var("DISCOVERY_SCHEDULE").unwrap_or_else(|_| "0 0 * * * *".to_string());
        let queue_schedule =
            std::env::var("QUEUE_SCHEDULE").unwrap_or_else(|_| "0 */10 * * * *".to_string());
        let moderation_schedule =
            std::env::var("MODERATION_SCHEDULE").unwrap_or_else(|_| "0 */5 * * * *".to_string());

        Ok(Config {
            database_url,
            gateway_url,
            github_list_url,
            dune_api_key,
            dune_query_id,
            classifier_api_key,
            classifier_base_url,
            classifier_models,
            blacklisted_subplebbits,
            blacklisted_authors,
            moderate_on_update,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            queue_batch_size,
            moderation_batch_size,
            discovery_schedule,
            queue_schedule,
            moderation_schedule,
        })
    }
}

fn csv_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
