use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use audit_log::{AdmissionOutcome, AdmissionRecord, AuditEntry, AuditEventType, AuditSink};
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use policy_engine::{AdmissionGate, AdmissionRequest, ResourceKind, Verdict};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::upstream::Upstream;
use crate::{BoxError, ProxyBody};

/// Largest request body buffered for content inspection.
pub const MAX_INSPECTED_BODY: usize = 16 * 1024 * 1024;

const COMPONENT: &str = "http-proxy";
const ACCESS_DENIED_MESSAGE: &str = "Access to this API endpoint is not allowed";

/// Shared, read-only state of every connection.
#[derive(Debug)]
pub struct ProxyState {
    gate: Arc<AdmissionGate>,
    upstream: Upstream,
    audit: AuditSink,
}

impl ProxyState {
    pub fn new(gate: Arc<AdmissionGate>, upstream: Upstream, audit: AuditSink) -> Self {
        Self {
            gate,
            upstream,
            audit,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }
}

/// Serve one request: admit or reject it, forward admitted requests, and log
/// the outcome.
pub async fn handle<B>(
    state: Arc<ProxyState>,
    req: Request<B>,
    client: Arc<str>,
) -> Result<Response<ProxyBody>, Infallible>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = admit_and_forward(&state, req, request_id, &client).await;

    let status = response.status();
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    macro_rules! completion {
        ($level:ident, $msg:literal) => {
            $level!(
                %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms,
                client = %client,
                user_agent = %user_agent,
                $msg
            )
        };
    }
    if status.is_server_error() {
        completion!(error, "request failed");
    } else if status.is_client_error() {
        completion!(warn, "client error");
    } else {
        completion!(info, "request processed");
    }

    Ok(response)
}

async fn admit_and_forward<B>(
    state: &ProxyState,
    req: Request<B>,
    request_id: Uuid,
    client: &str,
) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();

    let (buffered, body) = if state.gate.buffers_body(&method, &path) {
        match Limited::new(body, MAX_INSPECTED_BODY).collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                (bytes.clone(), full(bytes))
            }
            Err(err) => {
                let (status, message) = if err.downcast_ref::<LengthLimitError>().is_some() {
                    (StatusCode::PAYLOAD_TOO_LARGE, "request body too large to inspect")
                } else {
                    (StatusCode::BAD_REQUEST, "failed to read request body")
                };
                warn!(%request_id, %method, %path, error = %err, "{message}");
                state.audit.record(AuditEntry::admission(
                    COMPONENT,
                    AdmissionRecord::new(request_id, &method, &path, AdmissionOutcome::Malformed)
                        .with_client(client)
                        .with_reason(message),
                ));
                return json_response(status, json!({ "message": message }));
            }
        }
    } else {
        (Bytes::new(), body.map_err(Into::into).boxed())
    };

    let mut admission = AdmissionRequest::new(&method, &path).with_body(&buffered);
    if let Some(query) = parts.uri.query() {
        admission = admission.with_query(query);
    }
    let verdict = state.gate.evaluate(&admission);

    let record = AdmissionRecord::new(request_id, &method, &path, outcome_of(&verdict)).with_client(client);
    let rejection = match &verdict {
        Verdict::Admit { layer } => {
            state.audit.record(AuditEntry::admission(
                COMPONENT,
                record.with_layer(layer.to_string()),
            ));
            None
        }
        Verdict::AccessDenied => {
            warn!(%request_id, %method, %path, "request denied by access policy");
            state.audit.record(AuditEntry::admission(
                COMPONENT,
                record.with_layer("access").with_reason(ACCESS_DENIED_MESSAGE),
            ));
            Some(json_response(
                StatusCode::FORBIDDEN,
                json!({ "message": ACCESS_DENIED_MESSAGE, "path": path, "method": method }),
            ))
        }
        Verdict::ContentDenied { kind, denial } => {
            let reason = denial.to_string();
            warn!(%request_id, %method, %path, %kind, %reason, "request denied by content filter");
            state.audit.record(AuditEntry::admission(
                COMPONENT,
                record.with_layer("content").with_reason(&reason),
            ));
            Some(json_response(
                StatusCode::FORBIDDEN,
                json!({ "message": content_denied_message(*kind), "reason": reason }),
            ))
        }
        Verdict::Malformed { detail } => {
            state.audit.record(AuditEntry::admission(
                COMPONENT,
                record.with_reason(detail),
            ));
            Some(json_response(
                StatusCode::BAD_REQUEST,
                json!({ "message": format!("invalid request: {detail}") }),
            ))
        }
    };
    if let Some(response) = rejection {
        return response;
    }

    match state.upstream.forward(Request::from_parts(parts, body)).await {
        Ok(resp) => resp.map(|b| b.map_err(Into::into).boxed()),
        Err(err) => {
            error!(%request_id, %method, %path, error = %err, "failed to forward request");
            state.audit.record(AuditEntry::new(
                AuditEventType::BackendUnavailable,
                COMPONENT,
                json!({
                    "request_id": request_id,
                    "backend": state.upstream.endpoint().to_string(),
                    "error": err.to_string(),
                }),
            ));
            json_response(
                StatusCode::BAD_GATEWAY,
                json!({ "message": "failed to reach the container engine", "error": err.to_string() }),
            )
        }
    }
}

fn outcome_of(verdict: &Verdict) -> AdmissionOutcome {
    match verdict {
        Verdict::Admit { .. } => AdmissionOutcome::Admitted,
        Verdict::AccessDenied | Verdict::ContentDenied { .. } => AdmissionOutcome::Denied,
        Verdict::Malformed { .. } => AdmissionOutcome::Malformed,
    }
}

fn content_denied_message(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Container => "Container creation denied by content filter",
        ResourceKind::Volume => "Volume creation denied by content filter",
        ResourceKind::Network => "Network creation denied by content filter",
        ResourceKind::Image => "Image operation denied by content filter",
    }
}

fn full(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<ProxyBody> {
    let mut response = Response::new(full(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
