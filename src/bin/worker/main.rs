#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::missing_crate_level_docs
)]

//! Notification worker
//!
//! Claims queued notification jobs and delivers them through their provider.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use notification_transport::{
    domain::notifications::{AsyncDispatcher, Job},
    infrastructure::{
        config::{JsonConfigStore, NotificationConfig},
        email::{LettreRelay, MandrillClient},
        queue::RedisJobQueue,
        templates::MiniJinjaRenderer,
        TransportRegistry,
    },
};
use tokio::signal;
use tracing::{error, info, warn};

const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Command-line arguments / environment variables
#[derive(Debug, Parser)]
pub struct Args {
    /// The notification configuration
    #[clap(flatten)]
    pub notifications: NotificationConfig,
}

#[mutants::skip]
#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Failed to load environment: {}", e);

        return Err(e.into());
    }

    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = args.notifications;

    let queue = Arc::new(RedisJobQueue::connect(&config.redis_url).await?);

    let registry = TransportRegistry::new(
        Arc::new(JsonConfigStore::load(&config.profiles_path)?),
        Arc::new(MiniJinjaRenderer::from_directory(&config.templates_path)),
        Arc::new(LettreRelay),
        Arc::new(MandrillClient::new()),
        AsyncDispatcher::new(queue.clone(), &config.queue_topic),
    );

    info!(topic = %config.queue_topic, "notification worker started");

    tokio::select! {
        _ = run(&registry, &queue, &config) => {}
        _ = signal::ctrl_c() => info!("notification worker stopping"),
    }

    Ok(())
}

#[mutants::skip]
async fn run(
    registry: &TransportRegistry,
    queue: &RedisJobQueue,
    config: &NotificationConfig,
) {
    let timeout = config.poll_timeout_secs as f64;

    loop {
        let payload = match queue.claim(&config.queue_topic, timeout).await {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "could not claim notification job");
                tokio::time::sleep(CLAIM_RETRY_DELAY).await;
                continue;
            }
        };

        let job = match Job::from_json(&payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "discarding malformed notification job");
                continue;
            }
        };

        let job_id = job.id;

        if let Err(e) = registry.perform(job).await {
            error!(%job_id, error = %e, "notification job failed");
        }
    }
}
