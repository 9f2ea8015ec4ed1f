//! Discovery sources feeding the known-address set.
//!
//! Two independent producers: a curated static list and an analytics query.
//! Neither blocks the other; both terminate by handing their newly observed
//! addresses to the crawl queue.

pub mod dune;
pub mod github;

pub use dune::DuneDiscovery;
pub use github::GithubDiscovery;

use crate::error::Result;
use crate::traits::IndexStore;
use crate::types::{DiscoveryOutcome, DiscoverySource};

/// Upsert a batch of discovered `(address, tags)` entries and enqueue the
/// newly observed ones. An entry-level failure never aborts the rest.
pub(crate) async fn ingest<S: IndexStore>(
    store: &S,
    source: DiscoverySource,
    entries: Vec<(String, Vec<String>)>,
) -> Result<DiscoveryOutcome> {
    let mut outcome = DiscoveryOutcome::default();

    for (address, tags) in entries {
        let address = address.trim();
        if address.is_empty() {
            tracing::warn!(source = source.as_str(), "Skipping entry with empty address");
            outcome.skipped_invalid += 1;
            continue;
        }

        match store.upsert_known_subplebbit(address, source, &tags).await {
            Ok(upsert) if upsert.was_inserted => {
                tracing::info!(address, source = source.as_str(), "Discovered new subplebbit");
                outcome.new_addresses.push(address.to_string());
            }
            Ok(_) => outcome.refreshed += 1,
            Err(e) => {
                tracing::warn!(address, error = %e, "Failed to upsert discovered subplebbit");
                outcome.skipped_invalid += 1;
            }
        }
    }

    for address in &outcome.new_addresses {
        store.enqueue(address).await?;
    }

    Ok(outcome)
}
