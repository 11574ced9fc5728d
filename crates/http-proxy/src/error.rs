use std::io;
use std::time::Duration;

use http::StatusCode;
use net_guard::BindError;
use thiserror::Error;

/// Errors raised by the proxy server and its backend client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Endpoint(#[from] BindError),

    #[error("failed to listen on {endpoint}: {source}")]
    Listen {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to container engine at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("container engine at {endpoint} did not respond within {}s", .after.as_secs())]
    Timeout { endpoint: String, after: Duration },

    #[error("HTTP exchange with the container engine failed: {0}")]
    Backend(#[from] hyper::Error),

    #[error("container engine answered {status} to {path}")]
    UnexpectedStatus { status: StatusCode, path: &'static str },

    #[error("failed to decode container engine response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to build backend request: {0}")]
    Request(#[from] http::Error),
}
