use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use permit_core::{to_analytics, to_events, to_ingestion, validate, PermitRecord};
use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelKind, ChannelSet, DispatchEnvelope};
use crate::fallback::FallbackStore;
use crate::logging::{LogLevel, SyncLogger};

/// How a `process` call ended. `Degraded` reports success to the caller
/// (the source record reached the fallback store) but is not a clean sync.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Clean,
    Degraded,
    Rejected,
    Failed,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Clean => "clean",
            ProcessOutcome::Degraded => "degraded",
            ProcessOutcome::Rejected => "rejected",
            ProcessOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub outcome: ProcessOutcome,
    pub permit_id: Option<String>,
}

impl ProcessResult {
    fn rejected(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            outcome: ProcessOutcome::Rejected,
            permit_id: None,
        }
    }
}

/// Settlement of one channel submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub channel: ChannelKind,
    pub result: Result<(), String>,
}

/// Validates a permit, fans the derived shapes out to the three channels and
/// falls back to durable storage when any of them fails. Holds no state
/// across calls.
pub struct SyncService {
    channels: ChannelSet,
    fallback: Arc<dyn FallbackStore>,
    logger: SyncLogger,
}

impl SyncService {
    pub fn new(channels: ChannelSet, fallback: Arc<dyn FallbackStore>, logger: SyncLogger) -> Self {
        Self {
            channels,
            fallback,
            logger,
        }
    }

    pub fn logger(&self) -> &SyncLogger {
        &self.logger
    }

    pub async fn process(&self, candidate: &Value) -> ProcessResult {
        let validation = validate(Some(candidate));
        if !validation.valid {
            self.logger.emit(LogLevel::Warn, || {
                warn!(
                    event = "permit_rejected",
                    error_count = validation.errors.len(),
                    errors = ?validation.errors
                )
            });
            return ProcessResult::rejected(validation.errors);
        }

        // Validation shares the decoder's field readers, so this only fails
        // if the two drift apart.
        let record = match PermitRecord::from_value(candidate) {
            Ok(record) => record,
            Err(err) => {
                let message = format!("Permit data has an unexpected shape: {err}");
                self.logger.emit(LogLevel::Error, || {
                    error!(event = "permit_decode_failed", error = %message)
                });
                return ProcessResult::rejected(vec![message]);
            }
        };

        let outcomes = self.dispatch(&record, Utc::now()).await;
        let mut errors = Vec::new();
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => self.logger.emit(LogLevel::Debug, || {
                    debug!(
                        event = "channel_sent",
                        permit_id = %record.id,
                        channel = %outcome.channel
                    )
                }),
                Err(reason) => {
                    self.logger.emit(LogLevel::Warn, || {
                        warn!(
                            event = "channel_failed",
                            permit_id = %record.id,
                            channel = %outcome.channel,
                            error = %reason
                        )
                    });
                    errors.push(format!(
                        "Failed to send to {} channel: {reason}",
                        outcome.channel
                    ));
                }
            }
        }

        if errors.is_empty() {
            self.logger.emit(LogLevel::Info, || {
                info!(event = "permit_synced", permit_id = %record.id)
            });
            return ProcessResult {
                success: true,
                errors,
                outcome: ProcessOutcome::Clean,
                permit_id: Some(record.id),
            };
        }

        match self.fallback.upsert(&record).await {
            Ok(()) => {
                self.logger.emit(LogLevel::Warn, || {
                    warn!(
                        event = "permit_degraded",
                        permit_id = %record.id,
                        failed_channels = errors.len()
                    )
                });
                ProcessResult {
                    success: true,
                    errors,
                    outcome: ProcessOutcome::Degraded,
                    permit_id: Some(record.id),
                }
            }
            Err(err) => {
                self.logger.emit(LogLevel::Error, || {
                    error!(event = "fallback_failed", permit_id = %record.id, error = %err)
                });
                errors.push(format!("Fallback storage failed: {err}"));
                ProcessResult {
                    success: false,
                    errors,
                    outcome: ProcessOutcome::Failed,
                    permit_id: Some(record.id),
                }
            }
        }
    }

    /// Submit the three derived shapes concurrently and wait for every
    /// submission to settle. Outcomes come back in `ChannelKind::ALL` order.
    pub async fn dispatch(
        &self,
        record: &PermitRecord,
        submitted_at: DateTime<Utc>,
    ) -> Vec<ChannelOutcome> {
        let handles = ChannelKind::ALL.map(|kind| {
            let payload = derive_payload(kind, record);
            let channel = self.channels.get(kind);
            tokio::spawn(async move {
                match payload {
                    Ok(payload) => {
                        let envelope = DispatchEnvelope::new(kind, payload, submitted_at);
                        channel.send(&envelope).await.map_err(|err| err.to_string())
                    }
                    Err(err) => Err(err),
                }
            })
        });

        let settled = join_all(handles).await;
        ChannelKind::ALL
            .into_iter()
            .zip(settled)
            .map(|(channel, joined)| ChannelOutcome {
                channel,
                result: joined.unwrap_or_else(|err| {
                    if err.is_panic() {
                        Err("channel task panicked".to_string())
                    } else {
                        Err("channel task cancelled".to_string())
                    }
                }),
            })
            .collect()
    }
}

fn derive_payload(kind: ChannelKind, record: &PermitRecord) -> Result<Value, String> {
    let payload = match kind {
        ChannelKind::Ingestion => serde_json::to_value(to_ingestion(record)),
        ChannelKind::Events => serde_json::to_value(to_events(record)),
        ChannelKind::Analytics => {
            let analytics = to_analytics(record).map_err(|err| err.to_string())?;
            serde_json::to_value(analytics)
        }
    };
    payload.map_err(|err| format!("payload serialization failed: {err}"))
}
