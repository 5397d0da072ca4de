use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, sync::Mutex as AsyncMutex};

pub const SOURCE_TAG: &str = "permit-sync-service";
pub const INTERFACE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Ingestion,
    Events,
    Analytics,
}

impl ChannelKind {
    /// Fixed dispatch order.
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::Ingestion,
        ChannelKind::Events,
        ChannelKind::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Ingestion => "ingestion",
            ChannelKind::Events => "events",
            ChannelKind::Analytics => "analytics",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "ingestion" => Ok(ChannelKind::Ingestion),
            "events" => Ok(ChannelKind::Events),
            "analytics" => Ok(ChannelKind::Analytics),
            other => Err(format!("Unknown channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub submitted_at: String,
    pub source: String,
    pub interface_version: String,
    pub channel: ChannelKind,
}

/// One derived payload as it is handed to a transport channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub payload: Value,
    pub metadata: EnvelopeMetadata,
}

impl DispatchEnvelope {
    pub fn new(channel: ChannelKind, payload: Value, submitted_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            metadata: EnvelopeMetadata {
                submitted_at: submitted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                source: SOURCE_TAG.to_string(),
                interface_version: INTERFACE_VERSION.to_string(),
                channel,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Delivery capability exposed by the managed pipeline platform.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn send(&self, envelope: &DispatchEnvelope) -> Result<(), ChannelError>;
}

/// One channel instance per logical destination.
#[derive(Clone)]
pub struct ChannelSet {
    ingestion: Arc<dyn TransportChannel>,
    events: Arc<dyn TransportChannel>,
    analytics: Arc<dyn TransportChannel>,
}

impl ChannelSet {
    pub fn new(
        ingestion: Arc<dyn TransportChannel>,
        events: Arc<dyn TransportChannel>,
        analytics: Arc<dyn TransportChannel>,
    ) -> Self {
        Self {
            ingestion,
            events,
            analytics,
        }
    }

    pub fn get(&self, kind: ChannelKind) -> Arc<dyn TransportChannel> {
        match kind {
            ChannelKind::Ingestion => self.ingestion.clone(),
            ChannelKind::Events => self.events.clone(),
            ChannelKind::Analytics => self.analytics.clone(),
        }
    }
}

/// Appends one JSON line per envelope to a local file.
pub struct SpoolChannel {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl SpoolChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl TransportChannel for SpoolChannel {
    async fn send(&self, envelope: &DispatchEnvelope) -> Result<(), ChannelError> {
        let mut line = serde_json::to_vec(envelope)
            .map_err(|err| ChannelError::Serialization(err.to_string()))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
