use clap::Parser;
use policy_engine::{PatternMode, Precedence};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dockgate",
    version,
    about = "Least-privilege proxy for the container-engine socket"
)]
pub struct Cli {
    /// TCP listen address; `:port` binds every interface
    #[arg(long, env = "LISTEN_ADDR", default_value = ":2375")]
    pub listen_addr: String,

    /// Unix socket to listen on instead of TCP
    #[arg(long, env = "LISTEN_SOCKET")]
    pub listen_socket: Option<String>,

    /// Octal permissions for the unix listen socket
    #[arg(long, env = "SOCKET_PERMS", default_value = "0666")]
    pub socket_perms: String,

    /// Container engine endpoint (unix://, tcp:// or a socket path)
    #[arg(long, env = "DOCKER_SOCKET", default_value = "unix:///var/run/docker.sock")]
    pub docker_socket: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Engine API version; detected from the engine when empty
    #[arg(long, env = "API_VERSION")]
    pub api_version: Option<String>,

    /// Content policy document (JSON, or YAML for .yaml/.yml)
    #[arg(long, env = "FILTERS_CONFIG")]
    pub filters_config: Option<PathBuf>,

    /// Append-only JSON-lines audit log
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Order of the access gate and the content filter
    #[arg(long, env = "DKRPRX__PRECEDENCE", default_value_t = Precedence::default())]
    pub precedence: Precedence,

    /// How invalid policy patterns are handled: lenient or strict
    #[arg(long, env = "DKRPRX__PATTERN_MODE", default_value = "lenient")]
    pub pattern_mode: PatternMode,
}
