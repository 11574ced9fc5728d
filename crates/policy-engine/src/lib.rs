//! # policy-engine
//!
//! Admission logic for the dockgate container-engine API proxy. Two layers
//! decide whether a request may reach the engine:
//!
//! * the **access matcher** grants or denies by API category and HTTP method;
//! * the **content filter** inspects create, pull and build requests against
//!   pattern-based rules for volumes, containers, networks and images.
//!
//! [`AdmissionGate`] composes both according to a [`Precedence`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use policy_engine::{
//!     loader, AccessMatcher, AccessPolicy, AdmissionGate, AdmissionRequest, ContentFilter,
//!     PatternMode, Precedence,
//! };
//!
//! let access = AccessPolicy { containers: true, post: true, ..AccessPolicy::default() };
//! let content = loader::load_content_policy("filters.json").unwrap();
//! let filter = ContentFilter::new(&content, PatternMode::Lenient).unwrap();
//! let gate = AdmissionGate::new(AccessMatcher::new(access), filter, Precedence::default());
//!
//! let body = br#"{"Image":"nginx","HostConfig":{"Privileged":true}}"#;
//! let req = AdmissionRequest::new("POST", "/v1.41/containers/create").with_body(body);
//! println!("{:?}", gate.evaluate(&req));
//! ```

mod access;
mod decision;
pub mod env;
mod error;
mod evaluator;
mod gate;
pub mod image;
pub mod loader;
pub mod matcher;
pub mod path;
pub mod request;
mod schema;

// Re-export primary public API at crate root.
pub use access::{AccessMatcher, AccessPolicy, Category, MethodClass};
pub use decision::{Denial, Dimension, FilterOutcome, Layer, ResourceKind, Verdict};
pub use error::PolicyError;
pub use evaluator::ContentFilter;
pub use gate::{AdmissionGate, Precedence};
pub use image::{parse_image_name, ImageRef};
pub use path::strip_api_version;
pub use request::AdmissionRequest;
pub use schema::{
    ContainerPolicy, ContentPolicy, ImagePolicy, NetworkPolicy, PatternMode, VolumePolicy,
};
