//! Structured pipeline events and the observers that consume them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::media::MediaType;
use crate::pipeline::{FailureReason, FileState, SkipReason};
use crate::sanitize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEventKind {
    Detected {
        media_type: MediaType,
    },
    Transition {
        from: FileState,
        to: FileState,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
    Filed {
        final_path: PathBuf,
        category: String,
    },
    Interrupted {
        during: FileState,
    },
}

/// One thing that happened to one file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub file_id: Uuid,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: PipelineEventKind,
}

impl PipelineEvent {
    pub fn new(file_id: Uuid, path: &Path, kind: PipelineEventKind) -> Self {
        Self {
            file_id,
            path: path.to_path_buf(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// No-op observer for unit tests.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// Turns events into log records. Paths are reduced to the file name.
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        let filename = sanitize::redact_path(&event.path);
        let file_id = event.file_id;

        match &event.kind {
            PipelineEventKind::Detected { media_type } => {
                info!(%file_id, %filename, %media_type, mime = media_type.mime_type(), "detected");
            }
            PipelineEventKind::Transition { from, to } => {
                debug!(%file_id, %filename, %from, %to, "state change");
            }
            PipelineEventKind::Skipped { reason } => {
                debug!(%file_id, %filename, %reason, "skipped");
            }
            PipelineEventKind::Failed { reason, message } => {
                warn!(%file_id, %filename, %reason, "failed, left in inbox: {}", message);
            }
            PipelineEventKind::Filed {
                final_path,
                category,
            } => {
                info!(
                    %file_id,
                    %filename,
                    %category,
                    dest = %sanitize::redact_path(final_path),
                    "filed"
                );
            }
            PipelineEventKind::Interrupted { during } => {
                info!(%file_id, %filename, %during, "interrupted by shutdown, left in inbox");
            }
        }
    }
}

/// Republishes events on a tokio broadcast channel for live UIs.
pub struct BroadcastObserver {
    sender: broadcast::Sender<PipelineEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl PipelineObserver for BroadcastObserver {
    fn on_event(&self, event: &PipelineEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
    }
}

/// Forwards every event to each inner observer in order.
pub struct FanoutObserver {
    observers: Vec<std::sync::Arc<dyn PipelineObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<std::sync::Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl PipelineObserver for FanoutObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
