//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Three independent periodic schedules: discovery, queue draining and the
//! moderation sweep. They are not mutually coordinated except through the
//! queue's advisory processing guard. Job bodies log and swallow errors so a
//! failed run simply waits for the next tick.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use plebbit_client::ForumClient;

use crate::discovery::{DuneDiscovery, GithubDiscovery};
use crate::listener::UpdateListeners;
use crate::moderation::Moderator;
use crate::queue::QueueProcessor;
use crate::traits::{Classify, IndexStore};

/// Cron expressions (6-field, seconds first) for the three schedules.
#[derive(Debug, Clone)]
pub struct Schedules {
    pub discovery: String,
    pub queue: String,
    pub moderation: String,
}

/// Start all scheduled tasks.
pub async fn start_scheduler<S, C, X>(
    github: Arc<GithubDiscovery<S>>,
    dune: Option<Arc<DuneDiscovery<S>>>,
    processor: Arc<QueueProcessor<S, C>>,
    listeners: Arc<UpdateListeners<S, C, X>>,
    moderator: Option<Arc<Moderator<S, X>>>,
    schedules: Schedules,
    moderation_batch_size: i64,
) -> Result<JobScheduler>
where
    S: IndexStore + 'static,
    C: ForumClient + 'static,
    X: Classify + 'static,
{
    let scheduler = JobScheduler::new().await?;

    // Discovery: both sources every tick; a failure of one never blocks the
    // other.
    let discovery_job = Job::new_async(schedules.discovery.as_str(), move |_uuid, _lock| {
        let github = github.clone();
        let dune = dune.clone();
        Box::pin(async move {
            if let Err(e) = github.run().await {
                tracing::error!(error = %e, "Static list discovery failed");
            }
            if let Some(dune) = dune {
                if let Err(e) = dune.run().await {
                    tracing::error!(error = %e, "Analytics discovery failed");
                }
            }
        })
    })?;
    scheduler.add(discovery_job).await?;

    // Queue: reconcile, evict stale forums, then drain one batch. Each forum
    // crawled successfully gets a live update listener.
    let queue_job = Job::new_async(schedules.queue.as_str(), move |_uuid, _lock| {
        let processor = processor.clone();
        let listeners = listeners.clone();
        Box::pin(async move {
            if let Err(e) = processor.reconcile().await {
                tracing::error!(error = %e, "Queue reconciliation failed");
            }
            if let Err(e) = processor.evict_stale().await {
                tracing::error!(error = %e, "Stale eviction failed");
            }
            match processor.drain().await {
                Ok(report) => {
                    for address in &report.succeeded {
                        if let Err(e) = listeners.ensure_listening(address).await {
                            tracing::warn!(address = %address, error = %e, "Failed to start update listener");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Queue drain failed"),
            }
        })
    })?;
    scheduler.add(queue_job).await?;

    // Moderation sweep over the unmoderated backlog.
    if let Some(moderator) = moderator {
        let moderation_job = Job::new_async(schedules.moderation.as_str(), move |_uuid, _lock| {
            let moderator = moderator.clone();
            Box::pin(async move {
                match moderator.sweep(moderation_batch_size).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Moderation sweep complete"),
                    Err(e) => tracing::error!(error = %e, "Moderation sweep failed"),
                }
            })
        })?;
        scheduler.add(moderation_job).await?;
    } else {
        tracing::warn!("No classifier configured, moderation sweep disabled");
    }

    scheduler.start().await?;

    tracing::info!(
        discovery = %schedules.discovery,
        queue = %schedules.queue,
        moderation = %schedules.moderation,
        "Scheduled tasks started"
    );
    Ok(scheduler)
}
