use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use net_guard::BackendEndpoint;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::ProxyBody;

/// API version assumed when detection fails.
pub const FALLBACK_API_VERSION: &str = "1.41";

/// Limit on connecting to the engine and receiving response headers.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Headers that describe one hop and are not forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP/1.1 client for the container engine. Each request uses a fresh
/// connection.
#[derive(Debug, Clone)]
pub struct Upstream {
    endpoint: BackendEndpoint,
    timeout: Duration,
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "ApiVersion")]
    api_version: String,
}

impl Upstream {
    pub fn new(endpoint: BackendEndpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Send `req` to the engine and return its response with the body still
    /// streaming.
    pub async fn forward(&self, req: Request<ProxyBody>) -> Result<Response<Incoming>, ProxyError> {
        let req = self.prepare(req)?;
        self.send(req, self.timeout).await
    }

    /// Ask the engine for its API version via `GET /version`.
    pub async fn detect_api_version(&self) -> Result<String, ProxyError> {
        let req = Request::get("/version")
            .header(header::HOST, self.host_header())
            .body(empty())?;
        let resp = self.send(req, VERSION_PROBE_TIMEOUT).await?;
        if !resp.status().is_success() {
            return Err(ProxyError::UnexpectedStatus {
                status: resp.status(),
                path: "/version",
            });
        }
        let body = resp.into_body().collect().await?.to_bytes();
        let info: VersionInfo = serde_json::from_slice(&body)?;
        Ok(info.api_version)
    }

    /// [`detect_api_version`](Self::detect_api_version), falling back to
    /// [`FALLBACK_API_VERSION`] with a warning.
    pub async fn api_version_or_fallback(&self) -> String {
        match self.detect_api_version().await {
            Ok(version) => {
                info!(api_version = %version, "detected container engine API version");
                version
            }
            Err(err) => {
                warn!(%err, fallback = FALLBACK_API_VERSION, "failed to detect container engine API version");
                FALLBACK_API_VERSION.to_string()
            }
        }
    }

    /// Rewrite `req` for the backend hop: origin-form URI, hop-by-hop headers
    /// removed, `Host` filled in when the client sent none.
    fn prepare(&self, req: Request<ProxyBody>) -> Result<Request<ProxyBody>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = Uri::builder().path_and_query(path_and_query).build()?;

        for name in &HOP_BY_HOP {
            parts.headers.remove(name);
        }
        if !parts.headers.contains_key(header::HOST) {
            parts.headers.insert(header::HOST, self.host_header());
        }

        Ok(Request::from_parts(parts, body))
    }

    fn host_header(&self) -> HeaderValue {
        match &self.endpoint {
            BackendEndpoint::Tcp(authority) => HeaderValue::from_str(authority)
                .unwrap_or_else(|_| HeaderValue::from_static("localhost")),
            BackendEndpoint::Unix(_) => HeaderValue::from_static("localhost"),
        }
    }

    async fn send(
        &self,
        req: Request<ProxyBody>,
        limit: Duration,
    ) -> Result<Response<Incoming>, ProxyError> {
        let exchange = async {
            let mut sender = self.connect().await?;
            Ok::<_, ProxyError>(sender.send_request(req).await?)
        };
        tokio::time::timeout(limit, exchange)
            .await
            .map_err(|_| ProxyError::Timeout {
                endpoint: self.endpoint.to_string(),
                after: limit,
            })?
    }

    async fn connect(&self) -> Result<http1::SendRequest<ProxyBody>, ProxyError> {
        let connect_err = |source| ProxyError::Connect {
            endpoint: self.endpoint.to_string(),
            source,
        };
        match &self.endpoint {
            BackendEndpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_err)?;
                handshake(stream).await
            }
            BackendEndpoint::Tcp(authority) => {
                let stream = TcpStream::connect(authority.as_str())
                    .await
                    .map_err(connect_err)?;
                handshake(stream).await
            }
        }
    }
}

async fn handshake<S>(stream: S) -> Result<http1::SendRequest<ProxyBody>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(%err, "backend connection ended with error");
        }
    });
    Ok(sender)
}

pub(crate) fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}
