use std::path::Path;

use anyhow::{Context, Result};
use policy_engine::env::{access_policy_from_env, content_policy_from_env, defaults_disabled};
use policy_engine::loader::{
    apply_defaults, load_content_policy, merge_policies, SafetyDefaults,
    DEFAULT_PROXY_CONTAINER_NAME,
};
use policy_engine::{AccessPolicy, ContentPolicy};
use tracing::{info, warn};

/// Both policy layers as assembled at startup.
#[derive(Debug)]
pub struct Policies {
    pub access: AccessPolicy,
    pub content: ContentPolicy,
    pub defaults_applied: bool,
}

/// Assemble the access and content policies.
///
/// The content policy comes from the optional policy file, overridden per
/// sub-policy by `DKRPRX__*` variables. The safety defaults then fill any
/// sub-policy that is still absent, unless `DKRPRX__DISABLE_DEFAULTS` is set.
/// A policy file that cannot be read or parsed is an error.
pub fn load_policies<F>(filters_config: Option<&Path>, lookup: F) -> Result<Policies>
where
    F: Fn(&str) -> Option<String>,
{
    let access = access_policy_from_env(&lookup);

    let from_file = match filters_config {
        Some(path) => {
            let policy = load_content_policy(path)
                .with_context(|| format!("failed to load content policy from {}", path.display()))?;
            info!(path = %path.display(), "content policy file loaded");
            policy
        }
        None => ContentPolicy::default(),
    };
    let merged = merge_policies(from_file, content_policy_from_env(&lookup));

    if defaults_disabled(&lookup) {
        warn!("safety defaults disabled; the proxy's own container and the engine socket are unprotected");
        return Ok(Policies {
            access,
            content: merged,
            defaults_applied: false,
        });
    }

    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let defaults = SafetyDefaults {
        container_name: non_empty("PROXY_CONTAINER_NAME")
            .unwrap_or_else(|| DEFAULT_PROXY_CONTAINER_NAME.to_string()),
        network_name: non_empty("PROXY_NETWORK_NAME"),
    };
    Ok(Policies {
        access,
        content: apply_defaults(merged, &defaults),
        defaults_applied: true,
    })
}
