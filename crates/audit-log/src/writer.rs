use std::path::Path;

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::AuditEntry;

/// Errors that can occur during audit log I/O.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open audit log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to audit log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush audit log: {0}")]
    Flush(std::io::Error),
}

/// Buffered append-only writer producing one JSON object per line.
pub struct AuditWriter {
    out: BufWriter<tokio::fs::File>,
}

impl AuditWriter {
    /// Open (or create) `path` in append mode, creating parent directories.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AuditWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(AuditWriteError::OpenFile)?;

        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .await
            .map_err(AuditWriteError::Write)
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.out.flush().await.map_err(AuditWriteError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditEventType;

    #[tokio::test]
    async fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");

        let mut writer = AuditWriter::new(&path).await.unwrap();
        for event in [AuditEventType::ProxyStarted, AuditEventType::ProxyStopped] {
            writer
                .write(&AuditEntry::new(event, "test", serde_json::Value::Null))
                .await
                .unwrap();
        }
        writer.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, AuditEventType::ProxyStarted);
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        for _ in 0..2 {
            let mut writer = AuditWriter::new(&path).await.unwrap();
            writer
                .write(&AuditEntry::new(
                    AuditEventType::PolicyLoaded,
                    "test",
                    serde_json::Value::Null,
                ))
                .await
                .unwrap();
            writer.flush().await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
