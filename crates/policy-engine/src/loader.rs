use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::schema::{ContainerPolicy, ContentPolicy, NetworkPolicy, VolumePolicy};

/// Container name protected when `PROXY_CONTAINER_NAME` is unset.
pub const DEFAULT_PROXY_CONTAINER_NAME: &str = "docker-proxy";

/// Load a [`ContentPolicy`] from disk.
///
/// Files ending in `.yaml` or `.yml` are parsed as YAML, anything else as
/// JSON. Unreadable or invalid files are errors.
pub fn load_content_policy(path: impl AsRef<Path>) -> Result<ContentPolicy> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file: {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let policy = if is_yaml {
        load_content_policy_from_yaml_str(&contents)
    } else {
        load_content_policy_from_str(&contents)
    };
    policy.with_context(|| format!("failed to parse policy file: {}", path.display()))
}

/// Parse a [`ContentPolicy`] from a JSON string.
pub fn load_content_policy_from_str(json: &str) -> Result<ContentPolicy> {
    serde_json::from_str(json).context("JSON deserialization failed")
}

/// Parse a [`ContentPolicy`] from a YAML string.
pub fn load_content_policy_from_yaml_str(yaml: &str) -> Result<ContentPolicy> {
    // An empty YAML document is an empty policy, matching `{}` in JSON.
    if yaml.trim().is_empty() {
        return Ok(ContentPolicy::default());
    }
    serde_yml::from_str(yaml).context("YAML deserialization failed")
}

/// Combine a file policy with an environment policy. Each sub-policy present
/// in `env` replaces the file's wholesale; absent ones come from `file`.
pub fn merge_policies(file: ContentPolicy, env: ContentPolicy) -> ContentPolicy {
    ContentPolicy {
        volumes: env.volumes.or(file.volumes),
        containers: env.containers.or(file.containers),
        networks: env.networks.or(file.networks),
        images: env.images.or(file.images),
    }
}

/// Names of the proxy's own resources that the safety defaults protect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyDefaults {
    pub container_name: String,
    pub network_name: Option<String>,
}

impl Default for SafetyDefaults {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_PROXY_CONTAINER_NAME.to_string(),
            network_name: None,
        }
    }
}

impl SafetyDefaults {
    /// The built-in protective policy: the proxy container's name, the
    /// engine socket as a host path, and the proxy network when named.
    pub fn policy(&self) -> ContentPolicy {
        let name = regex::escape(&self.container_name);
        let containers = ContainerPolicy {
            denied_names: vec![format!("^{name}$"), format!("^/{name}$")],
            ..ContainerPolicy::default()
        };
        let volumes = VolumePolicy {
            denied_paths: vec![
                r"^/var/run/docker\.sock$".to_string(),
                r"^/run/docker\.sock$".to_string(),
            ],
            ..VolumePolicy::default()
        };
        let networks = self
            .network_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map(|n| NetworkPolicy {
                denied_names: vec![format!("^{}$", regex::escape(n))],
                ..NetworkPolicy::default()
            });

        ContentPolicy {
            volumes: Some(volumes),
            containers: Some(containers),
            networks,
            images: None,
        }
    }
}

/// Fill sub-policies that are still absent with the safety defaults.
/// Configured sub-policies are never touched.
pub fn apply_defaults(policy: ContentPolicy, defaults: &SafetyDefaults) -> ContentPolicy {
    let fallback = defaults.policy();
    if policy.volumes.is_none() {
        debug!("volume sub-policy absent; applying socket-mount default");
    }
    if policy.containers.is_none() {
        debug!(container = %defaults.container_name, "container sub-policy absent; applying self-protection default");
    }
    merge_policies(fallback, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ImagePolicy;
    use std::io::Write;

    #[test]
    fn load_empty_document() {
        let policy = load_content_policy_from_str("{}").unwrap();
        assert!(policy.is_empty());
    }

    #[test]
    fn reject_invalid_json() {
        let err = load_content_policy_from_str("{\"volumes\": ").unwrap_err();
        assert!(
            err.to_string().contains("JSON deserialization failed"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_from_nonexistent_file() {
        let err = load_content_policy("/does/not/exist.json").unwrap_err();
        assert!(
            err.to_string().contains("failed to read policy file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"containers": {{"deny_privileged": true}}}}"#).unwrap();
        let policy = load_content_policy(file.path()).unwrap();
        assert!(policy.containers.unwrap().deny_privileged);
    }

    #[test]
    fn load_yaml_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(
            file,
            r#"
images:
  allowed_tags:
    - "^v[0-9]+\\.[0-9]+\\.[0-9]+$"
networks:
  allowed_drivers: [bridge]
"#
        )
        .unwrap();
        let policy = load_content_policy(file.path()).unwrap();
        assert_eq!(
            policy.images.unwrap().allowed_tags,
            vec![r"^v[0-9]+\.[0-9]+\.[0-9]+$"]
        );
        assert_eq!(policy.networks.unwrap().allowed_drivers, vec!["bridge"]);
    }

    #[test]
    fn invalid_file_names_the_path() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "not json").unwrap();
        let err = load_content_policy(file.path()).unwrap_err();
        assert!(
            err.to_string().contains("failed to parse policy file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn empty_yaml_is_empty_policy() {
        assert!(load_content_policy_from_yaml_str("\n").unwrap().is_empty());
    }

    #[test]
    fn env_sub_policy_replaces_file_sub_policy() {
        let file = load_content_policy_from_str(
            r#"{"volumes": {"denied_names": ["a"]}, "images": {"denied_repos": ["b"]}}"#,
        )
        .unwrap();
        let env = ContentPolicy {
            volumes: Some(VolumePolicy {
                allowed_drivers: vec!["local".into()],
                ..VolumePolicy::default()
            }),
            ..ContentPolicy::default()
        };
        let merged = merge_policies(file, env);
        let volumes = merged.volumes.unwrap();
        assert!(volumes.denied_names.is_empty(), "no field-level merge");
        assert_eq!(volumes.allowed_drivers, vec!["local"]);
        assert_eq!(merged.images.unwrap().denied_repos, vec!["b"]);
        assert!(merged.containers.is_none());
    }

    #[test]
    fn defaults_fill_absent_sub_policies() {
        let policy = apply_defaults(ContentPolicy::default(), &SafetyDefaults::default());
        let names = policy.containers.unwrap().denied_names;
        let escaped = regex::escape("docker-proxy");
        assert_eq!(names, vec![format!("^{escaped}$"), format!("^/{escaped}$")]);
        assert_eq!(policy.volumes.unwrap().denied_paths.len(), 2);
        assert!(policy.networks.is_none(), "no network default without a name");
        assert!(policy.images.is_none());
    }

    #[test]
    fn defaults_never_override_configured_sub_policies() {
        let configured = ContentPolicy {
            volumes: Some(VolumePolicy::default()),
            images: Some(ImagePolicy::default()),
            ..ContentPolicy::default()
        };
        let defaults = SafetyDefaults {
            container_name: "gate".into(),
            network_name: Some("proxy-net".into()),
        };
        let policy = apply_defaults(configured, &defaults);
        assert_eq!(policy.volumes, Some(VolumePolicy::default()));
        assert_eq!(policy.containers.unwrap().denied_names, vec!["^gate$", "^/gate$"]);
        assert_eq!(
            policy.networks.unwrap().denied_names,
            vec![format!("^{}$", regex::escape("proxy-net"))]
        );
    }

    #[test]
    fn default_patterns_match_the_protected_names() {
        let re = regex::Regex::new(&SafetyDefaults::default().policy().containers.unwrap().denied_names[1])
            .unwrap();
        assert!(re.is_match("/docker-proxy"));
        assert!(!re.is_match("/docker-proxy-2"));
    }
}
