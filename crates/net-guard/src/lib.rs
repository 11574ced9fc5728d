//! # net-guard
//!
//! Endpoint handling for the dockgate proxy: parsing listen and backend
//! addresses, preparing the unix listen socket, and warning when the proxy
//! is reachable beyond the local host.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use net_guard::{warn_if_exposed, BackendEndpoint, ListenEndpoint};
//!
//! # fn example() -> Result<(), net_guard::BindError> {
//! let backend = BackendEndpoint::parse("unix:///var/run/docker.sock")?;
//! match ListenEndpoint::resolve(":2375", None)? {
//!     ListenEndpoint::Tcp(addr) => {
//!         warn_if_exposed(&addr);
//!     }
//!     ListenEndpoint::Unix(path) => net_guard::prepare_unix_socket(&path)?,
//! }
//! # let _ = backend;
//! # Ok(())
//! # }
//! ```

mod endpoint;
mod guard;

pub use endpoint::{BackendEndpoint, ListenEndpoint};
pub use guard::{
    apply_socket_permissions, is_exposed, parse_socket_mode, prepare_unix_socket,
    remove_unix_socket, socket_mode_or_default, warn_if_exposed, BindError, DEFAULT_SOCKET_MODE,
};
