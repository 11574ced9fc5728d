use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Socket mode used when none is configured or the configured one is invalid.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Errors raised while preparing listen or backend endpoints.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidListenAddress { addr: String, reason: String },

    #[error("invalid backend endpoint '{endpoint}': {reason}")]
    InvalidBackend { endpoint: String, reason: String },

    #[error("invalid socket permissions '{value}': expected an octal mode such as 0660")]
    InvalidSocketMode { value: String },

    /// Refuse to delete something that is not a stale socket.
    #[error("refusing to replace {}: it exists and is not a unix socket", .path.display())]
    NotASocket { path: PathBuf },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// True when a listener on `addr` is reachable from other hosts.
pub fn is_exposed(addr: &SocketAddr) -> bool {
    !addr.ip().is_loopback()
}

/// Log a warning when `addr` accepts connections from other hosts. Anyone who
/// can reach the proxy can drive the container engine within the policy.
pub fn warn_if_exposed(addr: &SocketAddr) -> bool {
    let exposed = is_exposed(addr);
    if exposed {
        let scope = if addr.ip().is_unspecified() {
            "all interfaces"
        } else {
            "a non-loopback interface"
        };
        warn!(
            %addr,
            scope,
            "proxy is listening on {scope}; restrict network access to trusted clients"
        );
    }
    exposed
}

/// Parse an octal permission string such as `0666`, `660` or `0o660`.
pub fn parse_socket_mode(value: &str) -> Result<u32, BindError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if !digits.is_empty() && mode <= 0o7777 => Ok(mode),
        _ => Err(BindError::InvalidSocketMode {
            value: value.to_string(),
        }),
    }
}

/// Parse `value`, falling back to [`DEFAULT_SOCKET_MODE`] with a warning.
pub fn socket_mode_or_default(value: &str) -> u32 {
    parse_socket_mode(value).unwrap_or_else(|err| {
        warn!(%err, "using default socket permissions {DEFAULT_SOCKET_MODE:o}");
        DEFAULT_SOCKET_MODE
    })
}

/// Remove a stale socket left at `path` by a previous run.
///
/// A missing path is fine; anything other than a socket is an error.
pub fn prepare_unix_socket(path: &Path) -> Result<(), BindError> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(BindError::Io {
                action: "inspect",
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !meta.file_type().is_socket() {
        return Err(BindError::NotASocket {
            path: path.to_path_buf(),
        });
    }

    std::fs::remove_file(path).map_err(|source| BindError::Io {
        action: "remove stale socket",
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "removed stale socket");
    Ok(())
}

/// Set the permission bits of the socket at `path`.
pub fn apply_socket_permissions(path: &Path, mode: u32) -> Result<(), BindError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
        BindError::Io {
            action: "set permissions on",
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!(path = %path.display(), mode = %format!("{mode:04o}"), "socket permissions set");
    Ok(())
}

/// Remove the socket at `path` during shutdown. Failures are only logged.
pub fn remove_unix_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed listen socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove listen socket"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn loopback_is_not_exposed() {
        assert!(!is_exposed(&"127.0.0.1:2375".parse().unwrap()));
        assert!(!is_exposed(&"[::1]:2375".parse().unwrap()));
    }

    #[test]
    fn wildcard_and_public_are_exposed() {
        assert!(is_exposed(&"0.0.0.0:2375".parse().unwrap()));
        assert!(is_exposed(&"[::]:2375".parse().unwrap()));
        assert!(is_exposed(&"192.168.1.10:2375".parse().unwrap()));
        assert!(warn_if_exposed(&"0.0.0.0:2375".parse().unwrap()));
    }

    #[test]
    fn socket_modes() {
        assert_eq!(parse_socket_mode("0666").unwrap(), 0o666);
        assert_eq!(parse_socket_mode("660").unwrap(), 0o660);
        assert_eq!(parse_socket_mode("0o600").unwrap(), 0o600);
        for bad in ["", "rw-rw-rw-", "0999", "77777"] {
            assert!(parse_socket_mode(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(socket_mode_or_default("nope"), DEFAULT_SOCKET_MODE);
    }

    #[test]
    fn missing_socket_path_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        prepare_unix_socket(&dir.path().join("proxy.sock")).unwrap();
    }

    #[test]
    fn stale_socket_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        prepare_unix_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn regular_file_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("important.txt");
        std::fs::write(&path, "keep me").unwrap();

        let err = prepare_unix_socket(&path).unwrap_err();
        assert!(matches!(err, BindError::NotASocket { .. }));
        assert!(path.exists());
    }

    #[test]
    fn permissions_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        apply_socket_permissions(&path, 0o660).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        remove_unix_socket(&path);
        assert!(!path.exists());
        remove_unix_socket(&path);
    }
}
