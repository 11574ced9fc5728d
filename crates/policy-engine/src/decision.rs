use std::fmt;

use thiserror::Error;

/// An attribute of a request that content rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    VolumeName,
    HostPath,
    Image,
    ContainerName,
    NetworkName,
    ImageRepository,
    ImageTag,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dimension::VolumeName => "volume name",
            Dimension::HostPath => "host path",
            Dimension::Image => "image",
            Dimension::ContainerName => "container name",
            Dimension::NetworkName => "network name",
            Dimension::ImageRepository => "image repository",
            Dimension::ImageTag => "image tag",
        })
    }
}

/// Why the content filter rejected a request. The `Display` form is the
/// reason string reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("{dimension} is denied: {value}")]
    Denied { dimension: Dimension, value: String },
    #[error("{dimension} not in allowed list: {value}")]
    NotAllowed { dimension: Dimension, value: String },
    #[error("{kind} driver not allowed: {driver}")]
    DriverNotAllowed { kind: ResourceKind, driver: String },
    #[error("privileged containers are denied")]
    Privileged,
    #[error("host network mode is denied")]
    HostNetwork,
    #[error("required labels are missing")]
    LabelsMissing,
    #[error("required label missing or mismatch: {key}")]
    LabelMismatch { key: String },
}

/// Resource kinds the content filter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Volume,
    Container,
    Network,
    Image,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Volume => "volume",
            ResourceKind::Container => "container",
            ResourceKind::Network => "network",
            ResourceKind::Image => "image",
        })
    }
}

/// Result of running the content filter on one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// No fine-grained rule applies to this request.
    NoOpinion,
    /// A configured sub-policy evaluated every check and passed.
    Authorized(ResourceKind),
    /// A rule rejected the request.
    Denied { kind: ResourceKind, denial: Denial },
}

impl FilterOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, FilterOutcome::Denied { .. })
    }
}

/// Which layer produced an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Access,
    Content,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Access => "access",
            Layer::Content => "content",
        })
    }
}

/// Final admission decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request. `layer` names the layer that authorized it.
    Admit { layer: Layer },
    /// The coarse access policy rejected the method or path.
    AccessDenied,
    /// A content rule rejected the request.
    ContentDenied { kind: ResourceKind, denial: Denial },
    /// The request body could not be inspected.
    Malformed { detail: String },
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit { .. })
    }

    /// The content rule's reason, when a content rule rejected the request.
    pub fn reason(&self) -> Option<String> {
        match self {
            Verdict::ContentDenied { denial, .. } => Some(denial.to_string()),
            _ => None,
        }
    }
}
