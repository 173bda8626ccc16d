use crate::feed::Backoff;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SUBPROTOCOL: &str = "graphql-ws";
const DEFAULT_GRPC_SOCKET: &str = "/tmp/temperature_api.sock";

fn setup_config_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    lookup("TEMPERATURE_SETUP_CONFIG_PATH")
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Values an operator can provide in the setup file instead of the environment.
#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    feed_uri: Option<String>,
    #[serde(default)]
    feed_subprotocol: Option<String>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    grpc_socket: Option<String>,
    #[serde(default)]
    reconnect_initial_ms: Option<u64>,
    #[serde(default)]
    reconnect_max_ms: Option<u64>,
    #[serde(default)]
    feed_read_timeout_secs: Option<u64>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_uri: Option<String>,
    /// `None` sends no `Sec-WebSocket-Protocol` header.
    pub feed_subprotocol: Option<String>,
    pub database_url: String,
    pub db_pool_size: u32,
    pub grpc_socket_path: String,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// 0 disables the read deadline.
    pub feed_read_timeout_secs: u64,
}

/// Trace collector endpoint. Environment only; read ahead of `Config::from_env`.
pub fn otlp_endpoint_from_env() -> Option<String> {
    dotenv().ok();
    otlp_endpoint(|key| env::var(key).ok())
}

fn otlp_endpoint(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let lookup = |key: &str| env::var(key).ok();
        let overrides = setup_config_path(&lookup)
            .and_then(|path| load_setup_config_overrides(&path))
            .unwrap_or_default();
        Self::from_lookup(lookup, &overrides)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        overrides: &SetupConfigOverrides,
    ) -> Result<Self> {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let fallback = |value: Option<&String>| {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str| -> Result<Option<u64>> {
            text(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .with_context(|| format!("{key} must be a non-negative integer, got {value:?}"))
                })
                .transpose()
        };

        let database_url = text("TEMPERATURE_DATABASE_URL")
            .or_else(|| text("DATABASE_URL"))
            .or_else(|| fallback(overrides.database_url.as_ref()))
            .context("TEMPERATURE_DATABASE_URL or DATABASE_URL is required (or database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let feed_uri = text("FEED_URI").or_else(|| fallback(overrides.feed_uri.as_ref()));

        // an explicitly empty value turns the header off
        let feed_subprotocol = match lookup("TEMPERATURE_FEED_SUBPROTOCOL") {
            Some(value) => Some(value.trim().to_string()),
            None => overrides
                .feed_subprotocol
                .as_ref()
                .map(|value| value.trim().to_string()),
        }
        .unwrap_or_else(|| DEFAULT_SUBPROTOCOL.to_string());
        let feed_subprotocol = Some(feed_subprotocol).filter(|value| !value.is_empty());

        let db_pool_size = match number("TEMPERATURE_DB_POOL_SIZE")? {
            Some(value) => u32::try_from(value).context("TEMPERATURE_DB_POOL_SIZE is too large")?,
            None => overrides.db_pool_size.unwrap_or(5),
        };
        let grpc_socket_path = text("TEMPERATURE_GRPC_SOCKET")
            .or_else(|| fallback(overrides.grpc_socket.as_ref()))
            .unwrap_or_else(|| DEFAULT_GRPC_SOCKET.to_string());
        let reconnect_initial_ms = number("TEMPERATURE_RECONNECT_INITIAL_MS")?
            .or(overrides.reconnect_initial_ms)
            .unwrap_or(500);
        let reconnect_max_ms = number("TEMPERATURE_RECONNECT_MAX_MS")?
            .or(overrides.reconnect_max_ms)
            .unwrap_or(30_000);
        let feed_read_timeout_secs = number("TEMPERATURE_FEED_READ_TIMEOUT_SECS")?
            .or(overrides.feed_read_timeout_secs)
            .unwrap_or(0);

        Ok(Self {
            feed_uri,
            feed_subprotocol,
            database_url,
            db_pool_size: db_pool_size.max(1),
            grpc_socket_path,
            reconnect_initial_ms,
            reconnect_max_ms,
            feed_read_timeout_secs,
        })
    }

    pub fn feed_uri(&self) -> Result<&str> {
        self.feed_uri
            .as_deref()
            .context("FEED_URI is required to consume the temperature feed")
    }

    pub fn reconnect_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_initial_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    pub fn feed_read_timeout(&self) -> Option<Duration> {
        Some(self.feed_read_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
