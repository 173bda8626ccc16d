use crate::error::ToggleError;
use crate::reading::Reading;
use crate::stats::IngestStats;
use crate::status::set_status;
use crate::store::{ConfigStore, ReadingQuery, TimeRange};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use tonic_health::server::health_reporter;

pub mod proto {
    tonic::include_proto!("temperature.api");
}

use proto::temperature_api_server::{TemperatureApi, TemperatureApiServer};
use proto::{
    CurrentTemperatureRequest, CurrentTemperatureResponse, HealthRequest, HealthResponse,
    Reading as RpcReading, TemperatureStatisticsRequest, TemperatureStatisticsResponse,
    ToggleFeedRequest, ToggleFeedResponse,
};

/// Query and control API over the shared store.
///
/// `stats` is present only when this process also runs the ingest loop.
pub struct ApiService<S> {
    store: Arc<S>,
    stats: Option<Arc<IngestStats>>,
}

impl<S> ApiService<S> {
    pub fn new(store: Arc<S>, stats: Option<Arc<IngestStats>>) -> Self {
        Self { store, stats }
    }

    fn to_health(&self) -> HealthResponse {
        let build = env!("CARGO_PKG_VERSION").to_string();
        let Some(stats) = &self.stats else {
            return HealthResponse {
                build,
                ..Default::default()
            };
        };

        HealthResponse {
            ingesting: true,
            feed_connected: stats.feed_connected.load(Ordering::Relaxed),
            buffered: stats.buffered.load(Ordering::Relaxed),
            total_written: stats.total_written.load(Ordering::Relaxed),
            last_batch_len: stats.last_batch_len.load(Ordering::Relaxed),
            last_flush_unix_ms: stats.last_flush_unix_ms.load(Ordering::Relaxed),
            dropped_messages: stats.dropped_messages.load(Ordering::Relaxed),
            gated_messages: stats.gated_messages.load(Ordering::Relaxed),
            reconnects: stats.reconnects.load(Ordering::Relaxed),
            last_error: stats.last_error().unwrap_or_default(),
            build,
        }
    }
}

fn parse_bound(field: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, Status> {
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| Status::invalid_argument(format!("invalid {field} timestamp {raw:?}: {err}")))
    })
    .transpose()
}

fn map_reading(reading: Reading) -> RpcReading {
    RpcReading {
        timestamp: reading
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        value: reading.value.normalize().to_string(),
    }
}

#[tonic::async_trait]
impl<S> TemperatureApi for ApiService<S>
where
    S: ConfigStore + ReadingQuery + 'static,
{
    async fn current_temperature(
        &self,
        _request: Request<CurrentTemperatureRequest>,
    ) -> Result<Response<CurrentTemperatureResponse>, Status> {
        let reading = self
            .store
            .current()
            .await
            .map_err(|err| Status::unavailable(format!("failed to read temperature: {err}")))?;
        Ok(Response::new(CurrentTemperatureResponse {
            reading: reading.map(map_reading),
        }))
    }

    async fn temperature_statistics(
        &self,
        request: Request<TemperatureStatisticsRequest>,
    ) -> Result<Response<TemperatureStatisticsResponse>, Status> {
        let payload = request.into_inner();
        let range = TimeRange::new(
            parse_bound("after", payload.after)?,
            parse_bound("before", payload.before)?,
        );

        let stats = self
            .store
            .statistics(range)
            .await
            .map_err(|err| Status::unavailable(format!("failed to aggregate: {err}")))?;
        Ok(Response::new(TemperatureStatisticsResponse {
            min: stats.map(|s| s.min.normalize().to_string()),
            max: stats.map(|s| s.max.normalize().to_string()),
        }))
    }

    async fn toggle_feed(
        &self,
        request: Request<ToggleFeedRequest>,
    ) -> Result<Response<ToggleFeedResponse>, Status> {
        let payload = request.into_inner();
        let status = set_status(self.store.as_ref(), &payload.status)
            .await
            .map_err(|err| match err {
                ToggleError::Validation(err) => Status::invalid_argument(err.to_string()),
                ToggleError::Storage(err) => {
                    Status::unavailable(format!("failed to store status: {err}"))
                }
            })?;
        Ok(Response::new(ToggleFeedResponse {
            status: status.to_string(),
        }))
    }

    async fn get_health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(self.to_health()))
    }
}

pub async fn serve_uds<S>(
    socket_path: &str,
    service: ApiService<S>,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    S: ConfigStore + ReadingQuery + 'static,
{
    if Path::new(socket_path).exists() {
        tokio::fs::remove_file(socket_path).await.ok();
    }

    let uds = UnixListener::bind(socket_path)?;
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<TemperatureApiServer<ApiService<S>>>()
        .await;

    let incoming = UnixListenerStream::new(uds);
    tracing::info!(socket = socket_path, "serving temperature API");

    Server::builder()
        .add_service(health_service)
        .add_service(TemperatureApiServer::new(service))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    Ok(())
}
