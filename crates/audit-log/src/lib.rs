//! Append-only JSON-lines audit trail for the dockgate proxy.
//!
//! Every admission decision and lifecycle event becomes one newline-terminated
//! JSON object, written by a background task so request handlers never touch
//! the file.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AdmissionOutcome, AdmissionRecord, AuditEntry, AuditSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/dockgate/audit.jsonl").await?;
//!
//! sink.record(AuditEntry::admission(
//!     "http-proxy",
//!     AdmissionRecord::new(uuid::Uuid::new_v4(), "GET", "/_ping", AdmissionOutcome::Admitted),
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AdmissionOutcome, AdmissionRecord, AuditEntry, AuditEventType};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
