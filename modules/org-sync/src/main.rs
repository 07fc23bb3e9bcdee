use cdc_ingest::{start_cdc_consumer, CdcAdapter, ChangeStream, InMemoryChangeStream, NatsChangeStream};
use event_bus::{InMemoryBus, RetryConfig};
use graph_sync::{GraphStore, HttpCypherGraph, InMemoryGraph};
use org_sync_rs::config::{BusType, Config};
use org_sync_rs::routes::{ops_router, AppState};
use outbox::{
    DeadLetterSink, InMemoryDeadLetterSink, InMemoryOutboxStore, OutboxProcessor, OutboxStore,
    PgDeadLetterSink, PgOutboxStore,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        bus_type = ?config.bus_type,
        durable_outbox = config.database_url.is_some(),
        remote_graph = config.graph.is_some(),
        "Configuration loaded"
    );

    let graph: Arc<dyn GraphStore> = match &config.graph {
        Some(graph_config) => {
            tracing::info!(url = %graph_config.url, "Using HTTP Cypher graph");
            Arc::new(HttpCypherGraph::new(graph_config.clone()).expect("Failed to build graph client"))
        }
        None => {
            tracing::info!("Using in-memory graph");
            Arc::new(InMemoryGraph::new())
        }
    };
    let registry = Arc::new(org_sync_rs::build_registry(graph, config.graph_write_timeout));

    let (store, dead_letter): (Arc<dyn OutboxStore>, Arc<dyn DeadLetterSink>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await
                    .expect("Failed to connect to database");
                outbox::run_migrations(&pool)
                    .await
                    .expect("Failed to run migrations");
                tracing::info!("Database connection established, migrations applied");
                (
                    Arc::new(PgOutboxStore::new(pool.clone())),
                    Arc::new(PgDeadLetterSink::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory outbox");
                (
                    Arc::new(InMemoryOutboxStore::new()),
                    Arc::new(InMemoryDeadLetterSink::new()),
                )
            }
        };

    let bus = Arc::new(InMemoryBus::new(registry.clone(), config.bus.clone()));
    bus.start().expect("Failed to start event bus");

    let processor = Arc::new(
        OutboxProcessor::new(store, registry.clone(), config.processor.clone())
            .with_dead_letter(dead_letter),
    );
    processor.start().expect("Failed to start outbox processor");

    let stream: Arc<dyn ChangeStream> = match config.bus_type {
        BusType::Nats => {
            tracing::info!(url = %config.nats_url, "Connecting to NATS");
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            Arc::new(NatsChangeStream::new(client))
        }
        BusType::InMemory => {
            tracing::info!("Using in-memory change stream");
            Arc::new(InMemoryChangeStream::new())
        }
    };
    let cdc = start_cdc_consumer(
        stream,
        &config.cdc_subject,
        Arc::new(CdcAdapter::default()),
        bus.clone(),
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await
    .expect("Failed to subscribe to CDC stream");

    let app = ops_router(AppState {
        processor: processor.clone(),
        bus: bus.clone(),
    })
    .layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("HOST/PORT must form a valid socket address");
    tracing::info!("Org sync service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");

    // Producers first, so nothing is published into a stopped bus
    cdc.stop().await;
    processor.stop().await;
    bus.stop().await;
    tracing::info!("Org sync service stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
