//! Analytics discovery source.
//!
//! Re-runs a materialized warehouse query whose rows carry forum names.
//! Before processing, structurally invalid known rows are purged so the
//! reconciliation that follows works from a clean set.

use std::sync::Arc;

use dune_client::{DuneClient, SubplebbitRow};

use crate::error::Result;
use crate::traits::IndexStore;
use crate::types::{DiscoveryOutcome, DiscoverySource};

pub struct DuneDiscovery<S> {
    store: Arc<S>,
    client: DuneClient,
    query_id: u64,
}

impl<S: IndexStore> DuneDiscovery<S> {
    pub fn new(store: Arc<S>, client: DuneClient, query_id: u64) -> Self {
        Self {
            store,
            client,
            query_id,
        }
    }

    pub async fn run(&self) -> Result<DiscoveryOutcome> {
        let purged = self.store.purge_invalid_known().await?;
        if purged > 0 {
            tracing::warn!(purged, "Purged structurally invalid known subplebbits");
        }

        let rows: Vec<SubplebbitRow> = self.client.run_query(self.query_id).await?;

        let entries = rows
            .into_iter()
            .map(|row| (row.name.unwrap_or_default(), Vec::new()))
            .collect();

        let outcome = super::ingest(self.store.as_ref(), DiscoverySource::Dune, entries).await?;

        tracing::info!(
            new = outcome.new_addresses.len(),
            refreshed = outcome.refreshed,
            skipped = outcome.skipped_invalid,
            "Analytics discovery complete"
        );

        Ok(outcome)
    }
}
