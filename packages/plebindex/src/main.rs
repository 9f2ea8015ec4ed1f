//! Indexer daemon: wires the store, the network client, discovery, the
//! queue processor and the moderation cascade together, then runs the three
//! periodic schedules until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classifier_client::ClassifierClient;
use dune_client::DuneClient;
use plebbit_client::PlebbitClient;

use plebindex::discovery::{DuneDiscovery, GithubDiscovery};
use plebindex::scheduler::{start_scheduler, Schedules};
use plebindex::{
    Config, Indexer, Moderator, PostgresIndexStore, QueueProcessor, UpdateListeners,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,plebindex=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting plebindex");

    let store = Arc::new(
        PostgresIndexStore::new(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );

    let client = Arc::new(PlebbitClient::with_timeout(
        config.gateway_url.clone(),
        config.fetch_timeout,
    ));

    let indexer = Arc::new(Indexer::new(
        store.clone(),
        client.clone(),
        config.blacklisted_subplebbits.clone(),
        config.blacklisted_authors.clone(),
        config.fetch_timeout,
    ));

    let moderator = config.classifier_api_key.as_ref().map(|api_key| {
        let mut classifier = ClassifierClient::new(api_key.clone());
        if let Some(base_url) = &config.classifier_base_url {
            classifier = classifier.with_base_url(base_url.clone());
        }
        Arc::new(Moderator::new(
            store.clone(),
            Arc::new(classifier),
            config.classifier_models.clone(),
        ))
    });

    let github = Arc::new(GithubDiscovery::new(
        store.clone(),
        config.github_list_url.clone(),
    ));

    let dune = config.dune_api_key.as_ref().map(|api_key| {
        Arc::new(DuneDiscovery::new(
            store.clone(),
            DuneClient::new(api_key.clone()),
            config.dune_query_id,
        ))
    });
    if dune.is_none() {
        tracing::warn!("DUNE_API_KEY not set, analytics discovery disabled");
    }

    let processor = Arc::new(QueueProcessor::new(
        store.clone(),
        indexer.clone(),
        config.queue_batch_size,
    ));

    let listeners = Arc::new(UpdateListeners::new(
        store.clone(),
        client.clone(),
        indexer.clone(),
        moderator.clone(),
        config.moderate_on_update,
    ));

    let _scheduler = start_scheduler(
        github,
        dune,
        processor,
        listeners,
        moderator,
        Schedules {
            discovery: config.discovery_schedule.clone(),
            queue: config.queue_schedule.clone(),
            moderation: config.moderation_schedule.clone(),
        },
        config.moderation_batch_size,
    )
    .await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    Ok(())
}
