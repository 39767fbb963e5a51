use std::sync::Arc;

use anyhow::Result;
use tokio::signal;

use beacon_pipeline::bus::{RedisAvailabilityPublisher, RedisSubscriber};
use beacon_pipeline::config::Settings;
use beacon_pipeline::fanout::{FanOutDispatcher, RedisRecipientResolver};
use beacon_pipeline::pipeline::EventProcessor;
use beacon_pipeline::store::{create_record_store, ChangeFeedStore};
use beacon_pipeline::subscription::SubscriptionRegistry;
use beacon_pipeline::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing (guard must outlive the server)
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Compile subscriptions once; a malformed file is fatal here
    let registry = Arc::new(SubscriptionRegistry::from_file(&settings.subscriptions.path)?);
    tracing::info!(
        path = %settings.subscriptions.path,
        subscriptions = registry.len(),
        "Subscription registry compiled"
    );

    // Record store with change feed
    let backend = create_record_store(&settings.store).await?;
    let store = Arc::new(ChangeFeedStore::new(
        backend,
        settings.store.changefeed_capacity,
    ));

    // Redis connection for fan-out collaborators
    let redis_client = redis::Client::open(settings.redis.url.as_str())?;
    let redis_conn = redis_client.get_connection_manager().await?;

    let recipients = Arc::new(RedisRecipientResolver::new(redis_conn.clone()));
    let publisher = Arc::new(RedisAvailabilityPublisher::new(
        redis_conn,
        settings.redis.availability_channel.clone(),
    ));

    // Event processor fed by the inbound subscriber
    let processor = Arc::new(EventProcessor::with_retry(
        registry,
        store.clone(),
        settings.fanout.retry_policy(),
    ));

    let subscriber = Arc::new(RedisSubscriber::new(settings.redis.clone(), processor));
    let shutdown_signal = subscriber.shutdown_signal();

    // Fan-out dispatcher consumes the change feed in the background
    let dispatcher = Arc::new(FanOutDispatcher::new(
        recipients,
        publisher,
        settings.fanout.to_config(),
    ));
    let feed = store.subscribe();
    let dispatcher_shutdown = shutdown_signal.subscribe();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(feed, dispatcher_shutdown).await;
    });

    // Inbound subscriber in the background
    let subscriber_clone = subscriber.clone();
    let subscriber_handle = tokio::spawn(async move {
        if let Err(e) = subscriber_clone.start().await {
            tracing::error!(error = %e, "Event subscriber failed");
        }
    });

    tracing::info!("Pipeline worker started");

    // Run until a shutdown signal arrives
    shutdown_signal_handler(shutdown_signal).await;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(subscriber_handle, dispatcher_handle);

    tracing::info!("Pipeline worker shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}
