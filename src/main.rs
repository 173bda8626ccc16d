mod cli;
mod config;
mod db;
mod error;
mod feed;
mod grpc;
mod ingest;
mod reading;
mod stats;
mod status;
mod store;

use crate::cli::{Args, Command};
use crate::config::{otlp_endpoint_from_env, Config};
use crate::db::{build_pool, ensure_schema, PgStore};
use crate::feed::WsFeed;
use crate::grpc::{serve_uds, ApiService};
use crate::ingest::{BatchSize, Ingestor};
use crate::stats::IngestStats;
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

fn init_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,temperature_sidecar=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "temperature-sidecar"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

/// Raised once on SIGINT or SIGTERM.
fn shutdown_channel() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        tracing::info!("shutdown signal received");
        signal_tx.send_replace(true);
    });
    (tx, rx)
}

/// The API server returning before shutdown was requested is a failure.
fn api_exit_unexpected(shutdown: &watch::Sender<bool>) -> bool {
    !*shutdown.borrow()
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn connect_store(config: &Config) -> Result<PgStore> {
    let pool = build_pool(&config.database_url, config.db_pool_size)
        .await
        .context("failed to connect to database")?;
    ensure_schema(&pool)
        .await
        .context("failed to prepare database schema")?;
    Ok(PgStore::new(pool))
}

fn build_feed(config: &Config) -> Result<WsFeed> {
    Ok(WsFeed::new(config.feed_uri()?)
        .with_subprotocol(config.feed_subprotocol.clone())
        .with_read_timeout(config.feed_read_timeout()))
}

async fn consume(
    config: &Config,
    batch_size: BatchSize,
    serve_api: bool,
) -> Result<()> {
    let feed = build_feed(config)?;
    let store = connect_store(config).await?;
    let stats = Arc::new(IngestStats::new());
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let ingestor = Ingestor::new(
        feed,
        store.clone(),
        store.clone(),
        batch_size,
        config.reconnect_backoff(),
        stats.clone(),
        shutdown_rx.clone(),
    );

    if !serve_api {
        let summary = ingestor
            .run()
            .await
            .context("ingestion stopped after storage failure")?;
        tracing::info!(
            written = summary.written,
            flushes = summary.flushes,
            reconnects = summary.reconnects,
            unflushed = summary.unflushed.len(),
            "ingestion finished"
        );
        return Ok(());
    }

    let service = ApiService::new(Arc::new(store), Some(stats));
    let grpc_path = config.grpc_socket_path.clone();
    let mut grpc_handle = tokio::spawn(async move {
        serve_uds(&grpc_path, service, stopped(shutdown_rx)).await
    });

    let ingest = ingestor.run();
    tokio::pin!(ingest);
    let (summary, grpc_result) = tokio::select! {
        summary = &mut ingest => {
            shutdown_tx.send_replace(true);
            (summary, grpc_handle.await)
        }
        res = &mut grpc_handle => {
            if api_exit_unexpected(&shutdown_tx) {
                tracing::error!("API server exited; stopping ingestion");
            } else {
                tracing::info!("API server stopped");
            }
            shutdown_tx.send_replace(true);
            (ingest.await, res)
        }
    };

    match grpc_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "API server failed"),
        Err(err) => tracing::error!(error = %err, "API task failed"),
    }
    let summary = summary.context("ingestion stopped after storage failure")?;
    tracing::info!(
        written = summary.written,
        flushes = summary.flushes,
        reconnects = summary.reconnects,
        unflushed = summary.unflushed.len(),
        "ingestion finished"
    );
    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let store = connect_store(config).await?;
    let (_shutdown_tx, shutdown_rx) = shutdown_channel();
    let service = ApiService::new(Arc::new(store), None);
    serve_uds(&config.grpc_socket_path, service, stopped(shutdown_rx)).await
}

async fn set_feed_status(config: &Config, raw: &str) -> Result<()> {
    let store = connect_store(config).await?;
    let committed = status::set_status(&store, raw).await?;
    println!("{committed}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(otlp_endpoint_from_env().as_deref())?;
    let config = Config::from_env()?;

    match args.command {
        Command::Consume { batch_size } => {
            consume(&config, BatchSize::try_from(batch_size)?, false).await
        }
        Command::Run { batch_size } => {
            consume(&config, BatchSize::try_from(batch_size)?, true).await
        }
        Command::Serve => serve(&config).await,
        Command::SetStatus { status } => set_feed_status(&config, &status).await,
    }
}
