mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink};
use http_proxy::{ProxyServer, ProxyState, Upstream};
use net_guard::{socket_mode_or_default, BackendEndpoint, ListenEndpoint};
use policy_engine::{AccessMatcher, AdmissionGate, ContentFilter};

use crate::cli::Cli;

const COMPONENT: &str = "dockgate";

/// How long the audit writer gets to drain after shutdown.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_addr = %cli.listen_addr,
        listen_socket = cli.listen_socket.as_deref().unwrap_or(""),
        backend = %cli.docker_socket,
        "dockgate starting"
    );

    // Policies.
    let policies = config::load_policies(cli.filters_config.as_deref(), |key| {
        std::env::var(key).ok()
    })?;

    let access = &policies.access;
    info!(
        categories = ?access.granted_categories(),
        methods = ?access.allowed_methods(),
        "access policy loaded"
    );
    if access.is_read_only() {
        warn!("no mutating method is enabled; the proxy is read-only");
    }

    let filter = ContentFilter::new(&policies.content, cli.pattern_mode)
        .context("failed to compile content policy")?;
    let gate = AdmissionGate::new(
        AccessMatcher::new(policies.access.clone()),
        filter,
        cli.precedence,
    );
    info!(
        precedence = %cli.precedence,
        pattern_mode = ?cli.pattern_mode,
        defaults_applied = policies.defaults_applied,
        "admission gate ready"
    );

    // Audit trail.
    let (audit, audit_handle) = match &cli.audit_log {
        Some(path) => {
            let (sink, handle) = AuditSink::start(path)
                .await
                .with_context(|| format!("failed to start audit log at {}", path.display()))?;
            info!(path = %path.display(), "audit log enabled");
            (sink, Some(handle))
        }
        None => (AuditSink::disabled(), None),
    };

    // Backend.
    let backend = BackendEndpoint::parse(&cli.docker_socket).context("invalid DOCKER_SOCKET")?;
    let upstream = Upstream::new(backend);
    let api_version = match cli.api_version.as_deref().map(str::trim) {
        Some(version) if !version.is_empty() => {
            info!(api_version = version, "using configured container engine API version");
            version.to_string()
        }
        _ => upstream.api_version_or_fallback().await,
    };

    // Listener.
    let listen = ListenEndpoint::resolve(&cli.listen_addr, cli.listen_socket.as_deref())
        .context("invalid listen address")?;
    let socket_mode = socket_mode_or_default(&cli.socket_perms);

    audit
        .log(AuditEntry::new(
            AuditEventType::ProxyStarted,
            COMPONENT,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "listen": listen.to_string(),
                "backend": upstream.endpoint().to_string(),
                "api_version": api_version,
            }),
        ))
        .await;
    audit
        .log(AuditEntry::new(
            AuditEventType::PolicyLoaded,
            COMPONENT,
            serde_json::json!({
                "policy_file": cli.filters_config.as_ref().map(|p| p.display().to_string()),
                "categories": policies.access.granted_categories(),
                "methods": policies.access.allowed_methods(),
                "content": serde_json::to_value(&policies.content)?,
                "precedence": cli.precedence.to_string(),
                "defaults_applied": policies.defaults_applied,
            }),
        ))
        .await;

    // Shutdown on ctrl-c or SIGTERM.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx_signal.send(());
    });

    let state = ProxyState::new(Arc::new(gate), upstream, audit.clone());
    let server = ProxyServer::new(listen, state).with_socket_mode(socket_mode);
    let result = match server.bind().await {
        Ok(bound) => bound.serve(shutdown_tx.subscribe()).await,
        Err(err) => Err(err),
    };

    info!("dockgate shutting down");
    audit
        .log(AuditEntry::new(
            AuditEventType::ProxyStopped,
            COMPONENT,
            serde_json::json!({
                "result": match &result {
                    Ok(()) => "ok".to_string(),
                    Err(err) => err.to_string(),
                },
            }),
        ))
        .await;

    drop(audit);
    if let Some(handle) = audit_handle {
        if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("audit log did not drain in time; recent entries may be lost");
        }
    }

    result.context("proxy server failed")
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(err) => warn!(%err, "failed to register SIGTERM handler; only ctrl-c stops the proxy"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received SIGINT (ctrl-c)");
}
