use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::guard::BindError;

const UNIX_SCHEME: &str = "unix://";
const TCP_SCHEME: &str = "tcp://";
const HTTP_SCHEME: &str = "http://";

/// Where the proxy accepts client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenEndpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenEndpoint {
    /// Resolve the listen settings. A non-empty `socket` wins over `addr`.
    ///
    /// `socket` may carry a `unix://` prefix. `addr` accepts `host:port` and
    /// the `:port` shorthand, which binds every interface.
    pub fn resolve(addr: &str, socket: Option<&str>) -> Result<Self, BindError> {
        if let Some(socket) = socket.map(str::trim).filter(|s| !s.is_empty()) {
            let path = strip_unix_scheme(socket);
            if path.is_empty() {
                return Err(BindError::InvalidListenAddress {
                    addr: socket.to_string(),
                    reason: "empty socket path".to_string(),
                });
            }
            return Ok(ListenEndpoint::Unix(PathBuf::from(path)));
        }
        parse_tcp_listen(addr).map(ListenEndpoint::Tcp)
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenEndpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

fn parse_tcp_listen(addr: &str) -> Result<SocketAddr, BindError> {
    let addr = addr.trim();
    let invalid = |reason: String| BindError::InvalidListenAddress {
        addr: addr.to_string(),
        reason,
    };

    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|e| invalid(format!("invalid port '{port}': {e}")))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    addr.parse::<SocketAddr>().map_err(|e| invalid(e.to_string()))
}

/// The container-engine API the proxy forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEndpoint {
    Unix(PathBuf),
    /// `host:port` authority.
    Tcp(String),
}

impl BackendEndpoint {
    /// Parse `unix:///path`, `tcp://host:port`, `http://host:port` or a bare
    /// socket path.
    pub fn parse(endpoint: &str) -> Result<Self, BindError> {
        let endpoint = endpoint.trim();
        let invalid = |reason: &str| BindError::InvalidBackend {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = endpoint.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(BackendEndpoint::Unix(PathBuf::from(path)));
        }

        let authority = endpoint
            .strip_prefix(TCP_SCHEME)
            .or_else(|| endpoint.strip_prefix(HTTP_SCHEME));
        if let Some(authority) = authority {
            let authority = authority.trim_end_matches('/');
            return match authority.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Ok(BackendEndpoint::Tcp(authority.to_string()))
                }
                _ => Err(invalid("expected host:port")),
            };
        }

        if endpoint.starts_with('/') {
            return Ok(BackendEndpoint::Unix(PathBuf::from(endpoint)));
        }
        Err(invalid("expected unix://, tcp:// or an absolute socket path"))
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            BackendEndpoint::Tcp(authority) => write!(f, "tcp://{authority}"),
        }
    }
}

fn strip_unix_scheme(s: &str) -> &str {
    s.strip_prefix(UNIX_SCHEME).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_shorthand_binds_all_interfaces() {
        let ep = ListenEndpoint::resolve(":2375", None).unwrap();
        assert_eq!(ep, ListenEndpoint::Tcp("0.0.0.0:2375".parse().unwrap()));
        assert_eq!(ep.to_string(), "tcp://0.0.0.0:2375");
    }

    #[test]
    fn explicit_host_and_port() {
        let ep = ListenEndpoint::resolve("127.0.0.1:8080", None).unwrap();
        assert_eq!(ep, ListenEndpoint::Tcp("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn socket_takes_priority() {
        let ep = ListenEndpoint::resolve(":2375", Some("unix:///tmp/proxy.sock")).unwrap();
        assert_eq!(ep, ListenEndpoint::Unix(PathBuf::from("/tmp/proxy.sock")));

        let ep = ListenEndpoint::resolve(":2375", Some("/run/proxy.sock")).unwrap();
        assert_eq!(ep, ListenEndpoint::Unix(PathBuf::from("/run/proxy.sock")));
    }

    #[test]
    fn blank_socket_falls_back_to_tcp() {
        let ep = ListenEndpoint::resolve(":2375", Some("  ")).unwrap();
        assert!(matches!(ep, ListenEndpoint::Tcp(_)));
    }

    #[test]
    fn invalid_listen_addresses() {
        for addr in [":notaport", "localhost", ":70000"] {
            let err = ListenEndpoint::resolve(addr, None).unwrap_err();
            assert!(
                matches!(err, BindError::InvalidListenAddress { .. }),
                "{addr}: {err}"
            );
        }
        assert!(ListenEndpoint::resolve(":1", Some("unix://")).is_err());
    }

    #[test]
    fn backend_forms() {
        assert_eq!(
            BackendEndpoint::parse("unix:///var/run/docker.sock").unwrap(),
            BackendEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            BackendEndpoint::parse("/var/run/docker.sock").unwrap(),
            BackendEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            BackendEndpoint::parse("tcp://engine.internal:2376").unwrap(),
            BackendEndpoint::Tcp("engine.internal:2376".into())
        );
        assert_eq!(
            BackendEndpoint::parse("http://10.0.0.5:2375/").unwrap(),
            BackendEndpoint::Tcp("10.0.0.5:2375".into())
        );
    }

    #[test]
    fn backend_rejects_garbage() {
        for endpoint in ["tcp://nohost", "tcp://:2375", "docker.sock", "unix://", "ssh://host"] {
            assert!(BackendEndpoint::parse(endpoint).is_err(), "{endpoint} should be rejected");
        }
    }

    #[test]
    fn backend_display_round_trips_scheme() {
        let ep = BackendEndpoint::parse("/var/run/docker.sock").unwrap();
        assert_eq!(ep.to_string(), "unix:///var/run/docker.sock");
    }
}
