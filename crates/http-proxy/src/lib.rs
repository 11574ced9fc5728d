//! Admission-gated reverse proxy for the container-engine HTTP API.
//!
//! Every request is checked by a [`policy_engine::AdmissionGate`] before it
//! is forwarded. Rejected requests get a JSON error and never reach the
//! engine; admitted ones are streamed through unchanged.
//!
//! ```text
//! client  --HTTP-->  http-proxy  --HTTP over unix/tcp-->  engine
//!                        |
//!                 [AdmissionGate]
//!                        |
//!                  [Audit Sink]
//! ```
//!
//! Only container, volume and network create bodies are buffered for
//! inspection. Everything else, including image build contexts, streams.

pub mod error;
pub mod handler;
pub mod listener;
pub mod upstream;

#[cfg(test)]
mod testutil;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type used on both hops.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

pub use error::ProxyError;
pub use handler::{handle, ProxyState, MAX_INSPECTED_BODY};
pub use listener::{BoundProxy, ProxyServer, HEADER_READ_TIMEOUT, SHUTDOWN_GRACE};
pub use upstream::{Upstream, DEFAULT_BACKEND_TIMEOUT, FALLBACK_API_VERSION};
