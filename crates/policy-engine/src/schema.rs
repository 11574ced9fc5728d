use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Fine-grained content rules, one optional sub-policy per resource kind.
///
/// An absent sub-policy defers that resource kind entirely to the coarse
/// access policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<VolumePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<ContainerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<NetworkPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ImagePolicy>,
}

impl ContentPolicy {
    /// True when no sub-policy is configured.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_none()
            && self.containers.is_none()
            && self.networks.is_none()
            && self.images.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumePolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_names: Vec<String>,
    /// Host paths that may back a volume.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_paths: Vec<String>,
    /// Exact driver names; empty means any driver.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_drivers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerPolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_names: Vec<String>,
    /// Labels that must be present with exactly these values.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub require_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deny_privileged: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deny_host_network: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkPolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_drivers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagePolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_repos: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_repos: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub denied_tags: Vec<String>,
}

/// How a pattern that fails to compile is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    /// The broken pattern never matches. A broken deny pattern therefore
    /// fails open.
    #[default]
    Lenient,
    /// Any broken pattern is a construction error.
    Strict,
}

impl std::str::FromStr for PatternMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(PatternMode::Lenient),
            "strict" => Ok(PatternMode::Strict),
            other => Err(format!("unknown pattern mode '{other}' (expected lenient or strict)")),
        }
    }
}
