//! Watch one office-hours queue and log every meeting change.
//!
//! Run with:
//! `OFFICEHOURS_BASE_URL=http://localhost:8000 OFFICEHOURS_QUEUE_ID=4 cargo run -p queue-watch`
//!
//! `OFFICEHOURS_RECONNECT` selects the reconnect policy (`flag` or
//! `visibility`, default `flag`).

use std::time::Duration;

use anyhow::{Context, bail};
use officehours_core::QueueHost;
use officehours_transport::{
    ConnectionConfig, ConnectionManager, ReconnectPolicy, Resource, Subscription, WsConnector,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

fn reconnect_policy() -> anyhow::Result<ReconnectPolicy> {
    match std::env::var("OFFICEHOURS_RECONNECT").as_deref() {
        Err(_) | Ok("flag") => Ok(ReconnectPolicy::Flag),
        Ok("visibility") => Ok(ReconnectPolicy::Visibility),
        Ok(other) => bail!("unknown reconnect policy {other:?}, expected flag or visibility"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let base = std::env::var("OFFICEHOURS_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:8000".to_string());
    let queue_id: u64 = std::env::var("OFFICEHOURS_QUEUE_ID")
        .context("OFFICEHOURS_QUEUE_ID is not set")?
        .parse()
        .context("OFFICEHOURS_QUEUE_ID is not a number")?;

    let resource = Resource::Queue(queue_id);
    let config = ConnectionConfig::new(resource.url(&base))
        .with_policy(reconnect_policy()?)
        .with_reconnect_delay(RECONNECT_DELAY);
    tracing::info!(%resource, url = %config.url, policy = ?config.policy, "watching");

    let subscription: Subscription<QueueHost> =
        Subscription::new().with_deleted_message("This queue has been deleted.");
    let mut changes = subscription.changes().subscribe();
    let router = subscription.host_router();
    let mut handle = ConnectionManager::new(WsConnector, config, router).spawn();

    let mut errors = handle.errors();
    let mut states = handle.states();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            change = changes.recv() => match change {
                Ok(event) => tracing::info!(id = event.id, "{}", event.text),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "missed change events"),
                Err(RecvError::Closed) => break,
            },
            Ok(()) = errors.changed() => {
                if let Some(error) = errors.borrow_and_update().clone() {
                    tracing::error!(%error, "connection error");
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                tracing::info!(?state, "connection state");
            }
            result = handle.wait() => {
                result?;
                break;
            }
        }
    }

    if let Some(queue) = subscription.snapshot().current() {
        tracing::info!(
            name = %queue.queue.name,
            status = %queue.queue.status,
            meetings = queue.meetings().len(),
            "last snapshot"
        );
    }

    handle.dispose().await?;
    Ok(())
}
