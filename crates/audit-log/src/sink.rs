use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// Cloneable handle submitting [`AuditEntry`] values to a background writer.
///
/// A sink built with [`AuditSink::disabled`] accepts entries and discards
/// them, so callers never branch on whether auditing is configured.
#[derive(Clone, Debug)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditSink {
    /// Spawn the background writer task appending to `path`.
    ///
    /// The task exits after a final flush once every clone of the sink has
    /// been dropped. I/O errors are logged and the entry is skipped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let mut writer = AuditWriter::new(path).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx: Some(tx) }, handle))
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `entry`, waiting for channel space. Used for lifecycle events.
    pub async fn log(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else { return };
        if let Err(err) = tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed; entry dropped"
            );
        }
    }

    /// Queue `entry` without waiting. Used on the request path, where a slow
    /// disk must not stall admission; a full channel drops the entry.
    pub fn record(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                tracing::warn!(event_type = ?entry.event_type, "audit channel full; entry dropped");
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                tracing::warn!(
                    event_type = ?entry.event_type,
                    "audit sink channel closed; entry dropped"
                );
            }
        }
    }
}

/// Drain the channel into `writer`, flushing after a quiet interval and once
/// more when the channel closes.
async fn run_writer_loop(writer: &mut AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write audit entry");
                } else {
                    dirty = true;
                }
            }
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!("audit writer background task shutting down");
                return;
            }
            Err(_) if dirty => {
                if let Err(err) = writer.flush().await {
                    tracing::error!(%err, "periodic audit log flush failed");
                } else {
                    dirty = false;
                }
            }
            Err(_) => {}
        }
    }
}
