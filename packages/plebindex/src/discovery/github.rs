//! Static-list discovery source.
//!
//! Fetches the curated multisub JSON document from a public repository and
//! upserts every listed address. The fetch itself fails loudly; individual
//! entries never abort the rest.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::traits::IndexStore;
use crate::types::{DiscoveryOutcome, DiscoverySource};

#[derive(Debug, Deserialize)]
struct MultisubDocument {
    #[serde(default)]
    subplebbits: Vec<MultisubEntry>,
}

#[derive(Debug, Deserialize)]
struct MultisubEntry {
    #[serde(default)]
    address: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct GithubDiscovery<S> {
    store: Arc<S>,
    http: reqwest::Client,
    url: String,
}

impl<S: IndexStore> GithubDiscovery<S> {
    pub fn new(store: Arc<S>, url: String) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            url,
        }
    }

    pub async fn run(&self) -> Result<DiscoveryOutcome> {
        tracing::info!(url = %self.url, "Fetching static subplebbit list");

        let doc: MultisubDocument = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entries = doc
            .subplebbits
            .into_iter()
            .map(|entry| (entry.address, entry.tags))
            .collect();

        let outcome = super::ingest(self.store.as_ref(), DiscoverySource::Github, entries).await?;

        tracing::info!(
            new = outcome.new_addresses.len(),
            refreshed = outcome.refreshed,
            skipped = outcome.skipped_invalid,
            "Static list discovery complete"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multisub_document_parses_with_and_without_tags() {
        let body = r#"{
            "title": "Default subplebbits",
            "subplebbits": [
                { "address": "memes.eth", "tags": ["funny", "images"] },
                { "address": "plebtoken.eth" }
            ]
        }"#;

        let doc: MultisubDocument = serde_json::from_str(body).unwrap();
        assert_eq!(doc.subplebbits.len(), 2);
        assert_eq!(doc.subplebbits[0].tags, vec!["funny", "images"]);
        assert!(doc.subplebbits[1].tags.is_empty());
    }
}
