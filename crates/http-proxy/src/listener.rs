use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use net_guard::{
    apply_socket_permissions, prepare_unix_socket, remove_unix_socket, warn_if_exposed,
    ListenEndpoint, DEFAULT_SOCKET_MODE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::handler::{self, ProxyState};

/// How long a client may take to send its request headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How long in-flight requests may run after shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The proxy before its listen socket is bound.
pub struct ProxyServer {
    endpoint: ListenEndpoint,
    state: Arc<ProxyState>,
    socket_mode: u32,
}

impl ProxyServer {
    pub fn new(endpoint: ListenEndpoint, state: ProxyState) -> Self {
        Self {
            endpoint,
            state: Arc::new(state),
            socket_mode: DEFAULT_SOCKET_MODE,
        }
    }

    /// Permission bits applied to a unix listen socket.
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Bind the listen socket.
    ///
    /// TCP listeners reachable from other hosts are warned about. A stale
    /// unix socket is replaced and the new one gets the configured mode.
    pub async fn bind(self) -> Result<BoundProxy, ProxyError> {
        let listen_err = |source| ProxyError::Listen {
            endpoint: self.endpoint.to_string(),
            source,
        };
        let listener = match &self.endpoint {
            ListenEndpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(listen_err)?;
                let local = listener.local_addr().map_err(listen_err)?;
                warn_if_exposed(&local);
                Listener::Tcp(listener)
            }
            ListenEndpoint::Unix(path) => {
                prepare_unix_socket(path)?;
                let listener = UnixListener::bind(path).map_err(listen_err)?;
                apply_socket_permissions(path, self.socket_mode)?;
                Listener::Unix(listener, path.clone())
            }
        };
        info!(endpoint = %self.endpoint, "proxy listening");
        Ok(BoundProxy {
            listener,
            state: self.state,
        })
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// A bound proxy, ready to accept connections.
pub struct BoundProxy {
    listener: Listener,
    state: Arc<ProxyState>,
}

impl BoundProxy {
    /// Address of a TCP listener, including the port picked for `:0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(l) => l.local_addr().ok(),
            Listener::Unix(..) => None,
        }
    }

    /// Accept connections until `shutdown` fires, then give in-flight
    /// requests [`SHUTDOWN_GRACE`] to finish.
    ///
    /// Each connection is served in its own task. Accept errors are logged
    /// and the loop keeps going.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ProxyError> {
        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown signal received; no longer accepting connections");
                    break;
                }
                accepted = accept(&self.listener) => match accepted {
                    Ok(Accepted::Tcp(stream, peer)) => {
                        spawn_connection(&graceful, &self.state, stream, Arc::from(peer.to_string()));
                    }
                    Ok(Accepted::Unix(stream)) => {
                        spawn_connection(&graceful, &self.state, stream, Arc::from("unix"));
                    }
                    Err(err) => warn!(%err, "failed to accept connection"),
                },
            }
        }

        if let Listener::Unix(_, path) = &self.listener {
            remove_unix_socket(path);
        }
        drop(self.listener);

        tokio::select! {
            _ = graceful.shutdown() => info!("all connections closed"),
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "shutdown grace period elapsed; dropping open connections");
            }
        }
        Ok(())
    }
}

enum Accepted {
    Tcp(tokio::net::TcpStream, SocketAddr),
    Unix(tokio::net::UnixStream),
}

async fn accept(listener: &Listener) -> std::io::Result<Accepted> {
    match listener {
        Listener::Tcp(l) => l.accept().await.map(|(s, peer)| Accepted::Tcp(s, peer)),
        Listener::Unix(l, _) => l.accept().await.map(|(s, _)| Accepted::Unix(s)),
    }
}

fn spawn_connection<S>(
    graceful: &GracefulShutdown,
    state: &Arc<ProxyState>,
    stream: S,
    client: Arc<str>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let state = Arc::clone(state);
    let peer = Arc::clone(&client);
    let service = service_fn(move |req: Request<Incoming>| {
        handler::handle(Arc::clone(&state), req, Arc::clone(&client))
    });
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .serve_connection(TokioIo::new(stream), service);
    let conn = graceful.watch(conn);

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(client = %peer, %err, "connection closed with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_backend;
    use crate::upstream::{empty, Upstream};
    use audit_log::AuditSink;
    use http::{Request, StatusCode};
    use net_guard::BackendEndpoint;
    use policy_engine::{
        AccessMatcher, AccessPolicy, AdmissionGate, ContentFilter, Precedence,
    };
    use std::os::unix::fs::PermissionsExt;

    fn ping_only(backend: BackendEndpoint) -> ProxyState {
        let access = AccessPolicy {
            ping: true,
            ..AccessPolicy::default()
        };
        let gate = AdmissionGate::new(
            AccessMatcher::new(access),
            ContentFilter::default(),
            Precedence::default(),
        );
        ProxyState::new(Arc::new(gate), Upstream::new(backend), AuditSink::disabled())
    }

    #[tokio::test]
    async fn serves_tcp_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_backend(dir.path()).await;
        let server = ProxyServer::new(
            ListenEndpoint::Tcp("127.0.0.1:0".parse().unwrap()),
            ping_only(BackendEndpoint::Unix(engine)),
        );
        let bound = server.bind().await.unwrap();
        let addr = bound.local_addr().unwrap();

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(bound.serve(rx));

        let client = Upstream::new(BackendEndpoint::Tcp(addr.to_string()));
        let ok = client
            .forward(Request::get("/_ping").body(empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = client
            .forward(Request::get("/containers/json").body(empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unix_socket_gets_mode_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_backend(dir.path()).await;
        let socket = dir.path().join("proxy.sock");
        let server = ProxyServer::new(
            ListenEndpoint::Unix(socket.clone()),
            ping_only(BackendEndpoint::Unix(engine)),
        )
        .with_socket_mode(0o660);
        let bound = server.bind().await.unwrap();
        assert!(bound.local_addr().is_none());
        let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(bound.serve(rx));

        let client = Upstream::new(BackendEndpoint::Unix(socket.clone()));
        let resp = client
            .forward(Request::get("/v1.45/_ping").body(empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.sock");
        std::fs::write(&path, "not a socket").unwrap();

        let server = ProxyServer::new(
            ListenEndpoint::Unix(path.clone()),
            ping_only(BackendEndpoint::Unix(dir.path().join("engine.sock"))),
        );
        assert!(matches!(server.bind().await, Err(ProxyError::Endpoint(_))));
        assert!(path.exists());
    }
}
