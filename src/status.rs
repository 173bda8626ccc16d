use crate::error::{StorageError, ToggleError, ValidationError};
use crate::store::ConfigStore;
use std::fmt;
use std::str::FromStr;

pub const STATUS_KEY: &str = "status";

/// Ingestion gate stored under [`STATUS_KEY`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedStatus {
    #[default]
    On,
    Off,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::On => "on",
            FeedStatus::Off => "off",
        }
    }

    pub fn is_on(self) -> bool {
        self == FeedStatus::On
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case("on") {
            Ok(FeedStatus::On)
        } else if raw.eq_ignore_ascii_case("off") {
            Ok(FeedStatus::Off)
        } else {
            Err(ValidationError::InvalidStatus(raw.to_string()))
        }
    }
}

/// Creates the status row with the default when it does not exist yet.
pub async fn ensure_status<C>(store: &C) -> Result<FeedStatus, StorageError>
where
    C: ConfigStore + ?Sized,
{
    let stored = store
        .ensure(STATUS_KEY, FeedStatus::default().as_str())
        .await?;
    Ok(interpret(&stored))
}

/// Reads the gate straight from the store; nothing is cached between calls.
pub async fn current_status<C>(store: &C) -> Result<FeedStatus, StorageError>
where
    C: ConfigStore + ?Sized,
{
    match store.get(STATUS_KEY).await? {
        Some(stored) => Ok(interpret(&stored)),
        None => Ok(FeedStatus::default()),
    }
}

/// Validates `raw` and stores its lowercase form.
pub async fn set_status<C>(store: &C, raw: &str) -> Result<FeedStatus, ToggleError>
where
    C: ConfigStore + ?Sized,
{
    let status: FeedStatus = raw.parse()?;
    let committed = store.upsert(STATUS_KEY, status.as_str()).await?;
    tracing::info!(status = %committed, "ingestion status updated");
    Ok(interpret(&committed))
}

// Only out-of-band edits can store anything else; keep the gate closed then.
fn interpret(stored: &str) -> FeedStatus {
    stored.parse().unwrap_or_else(|err: ValidationError| {
        tracing::warn!(error = %err, "unrecognized stored status; treating as off");
        FeedStatus::Off
    })
}
