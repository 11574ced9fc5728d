//! Fake container engine for tests.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::{header, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::UnixListener;

/// Serve a fake engine on `dir/engine.sock` and return the socket path.
///
/// `GET /version` reports API version 1.45. Every other request is echoed
/// back as JSON with its method, URI, body and selected headers.
pub async fn spawn_backend(dir: &Path) -> PathBuf {
    let path = dir.join("engine.sock");
    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(respond))
                    .await;
            });
        }
    });
    path
}

async fn respond(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() == "/version" {
        return Ok(Response::new(Full::new(Bytes::from_static(
            br#"{"ApiVersion":"1.45","Version":"27.0.0"}"#,
        ))));
    }

    let header_str = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let host = header_str(header::HOST);
    let connection = header_str(header::CONNECTION);
    let method = req.method().to_string();
    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(_) => String::new(),
    };

    let echoed = json!({
        "method": method,
        "uri": uri,
        "body": body,
        "host": host,
        "connection": connection,
    });
    Ok(Response::new(Full::new(Bytes::from(echoed.to_string()))))
}
