use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scylla_event_store::metrics::{self, Metrics};
use scylla_event_store::{Event, EventStore, RequestContext, ScyllaBackend, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scylla_event_store=debug")),
        )
        .init();

    let config = StoreConfig::from_env()?;
    tracing::info!(?config, "🚀 Starting ScyllaDB event store demo");

    // === 1. Connect and prepare keyspace/table ===
    let session: Session = SessionBuilder::new()
        .known_nodes(&config.nodes)
        .build()
        .await?;

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                config.keyspace
            ),
            &[],
        )
        .await?;
    session.use_keyspace(&config.keyspace, false).await?;

    let backend = ScyllaBackend::new(Arc::new(session), config.table.clone())
        .with_cas_retry(config.cas_retry());
    backend.create_schema().await?;

    // === 2. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new()
            .block_on(metrics::start_metrics_server(registry, metrics_port));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let store = EventStore::new(Arc::new(backend))
        .with_page_size(config.page_size)
        .with_metrics(metrics);

    // === 3. Append, conflict, append again, read back ===
    let aggregate_id = format!("order-{}", uuid::Uuid::new_v4());
    let ctx = RequestContext::new().with_timeout(Duration::from_secs(10));

    let mut first = [Event::new(&aggregate_id, "Order", 1, "x").with_reason("OrderCreated")];
    store.save(&ctx, &mut first).await?;
    tracing::info!(global_version = first[0].global_version, "✅ Saved version 1");

    let mut duplicate = [Event::new(&aggregate_id, "Order", 1, "y").with_reason("OrderCreated")];
    match store.save(&ctx, &mut duplicate).await {
        Err(e) if e.is_concurrency() => tracing::info!(error = %e, "Duplicate version rejected"),
        Err(e) => return Err(e.into()),
        Ok(()) => anyhow::bail!("duplicate version 1 was accepted"),
    }

    let mut second = [Event::new(&aggregate_id, "Order", 2, "z").with_reason("OrderUpdated")];
    store.save(&ctx, &mut second).await?;
    tracing::info!(global_version = second[0].global_version, "✅ Saved version 2");

    let mut history = store.get(&ctx, &aggregate_id, "Order", 0).await?;
    while history.next() {
        let event = history.value()?;
        tracing::info!(
            version = event.version,
            global_version = event.global_version,
            reason = %event.reason,
            data = %String::from_utf8_lossy(&event.data),
            "Replayed event"
        );
    }
    history.close();

    tracing::info!("🎉 Demo complete!");
    Ok(())
}
