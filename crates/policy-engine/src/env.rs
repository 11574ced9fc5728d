//! Policy settings read from environment variables.
//!
//! Every function takes a `lookup` closure instead of reading the process
//! environment directly, so callers pass `|k| std::env::var(k).ok()` and tests
//! pass a map.

use std::collections::BTreeMap;

use crate::access::{AccessPolicy, Category};
use crate::schema::{ContainerPolicy, ContentPolicy, ImagePolicy, NetworkPolicy, VolumePolicy};

/// Prefix of every content-policy variable.
pub const ENV_PREFIX: &str = "DKRPRX__";

/// Categories granted when their variable is unset.
const DEFAULT_GRANTED: [Category; 3] = [Category::Events, Category::Ping, Category::Version];

/// Parse an access flag: `1/true/yes` (and `t`) are true, `0/false/no` (and
/// `f`) are false, case-insensitively. Anything else, including an empty
/// value, yields `default`.
pub fn parse_access_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "t" => true,
        "0" | "false" | "no" | "f" => false,
        _ => default,
    }
}

/// Parse a content-policy switch: only `true/1/yes/on` are true.
pub fn parse_switch(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Split a list value on `|` if present, else `;`, else `,`. Items are
/// trimmed and empty items dropped.
pub fn split_list(value: &str) -> Vec<String> {
    let separator = if value.contains('|') {
        '|'
    } else if value.contains(';') {
        ';'
    } else {
        ','
    };
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `k=v` pairs separated like [`split_list`]. Pairs without `=` or
/// with an empty key are ignored.
pub fn split_pairs(value: &str) -> BTreeMap<String, String> {
    split_list(value)
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Build the coarse access policy from `EVENTS`, `PING`, `CONTAINERS`, ...,
/// `POST`, `DELETE` and `PUT`.
pub fn access_policy_from_env<F>(lookup: F) -> AccessPolicy
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |key: &str, default: bool| match lookup(key) {
        Some(v) if !v.is_empty() => parse_access_flag(&v, default),
        _ => default,
    };

    let mut policy = AccessPolicy::default();
    for category in Category::ALL {
        let default = DEFAULT_GRANTED.contains(&category);
        *policy.category_flag_mut(category) = flag(category.name(), default);
    }
    policy.post = flag("POST", false);
    policy.delete = flag("DELETE", false);
    policy.put = flag("PUT", false);
    policy
}

/// Reads `DKRPRX__`-prefixed variables and records whether any was set.
struct Section<'a, F> {
    lookup: &'a F,
    section: &'static str,
    touched: bool,
}

impl<'a, F> Section<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: &'a F, section: &'static str) -> Self {
        Self {
            lookup,
            section,
            touched: false,
        }
    }

    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{}__{key}", self.section)).filter(|v| !v.is_empty())
    }

    fn list(&mut self, key: &str) -> Vec<String> {
        let items = self.raw(key).map(|v| split_list(&v)).unwrap_or_default();
        self.touched |= !items.is_empty();
        items
    }

    fn pairs(&mut self, key: &str) -> BTreeMap<String, String> {
        let pairs = self.raw(key).map(|v| split_pairs(&v)).unwrap_or_default();
        self.touched |= !pairs.is_empty();
        pairs
    }

    fn switch(&mut self, key: &str) -> bool {
        match self.raw(key) {
            Some(v) => {
                self.touched = true;
                parse_switch(&v)
            }
            None => false,
        }
    }

    fn finish<T>(self, value: T) -> Option<T> {
        self.touched.then_some(value)
    }
}

/// Build a content policy from `DKRPRX__<KIND>__<FIELD>` variables.
///
/// A sub-policy is present only when at least one of its variables yields a
/// value.
pub fn content_policy_from_env<F>(lookup: F) -> ContentPolicy
where
    F: Fn(&str) -> Option<String>,
{
    let mut s = Section::new(&lookup, "VOLUMES");
    let volumes = VolumePolicy {
        allowed_names: s.list("ALLOWED_NAMES"),
        denied_names: s.list("DENIED_NAMES"),
        allowed_paths: s.list("ALLOWED_PATHS"),
        denied_paths: s.list("DENIED_PATHS"),
        allowed_drivers: s.list("ALLOWED_DRIVERS"),
    };
    let volumes = s.finish(volumes);

    let mut s = Section::new(&lookup, "CONTAINERS");
    let containers = ContainerPolicy {
        allowed_images: s.list("ALLOWED_IMAGES"),
        denied_images: s.list("DENIED_IMAGES"),
        allowed_names: s.list("ALLOWED_NAMES"),
        denied_names: s.list("DENIED_NAMES"),
        require_labels: s.pairs("REQUIRE_LABELS"),
        deny_privileged: s.switch("DENY_PRIVILEGED"),
        deny_host_network: s.switch("DENY_HOST_NETWORK"),
    };
    let containers = s.finish(containers);

    let mut s = Section::new(&lookup, "NETWORKS");
    let networks = NetworkPolicy {
        allowed_names: s.list("ALLOWED_NAMES"),
        denied_names: s.list("DENIED_NAMES"),
        allowed_drivers: s.list("ALLOWED_DRIVERS"),
    };
    let networks = s.finish(networks);

    let mut s = Section::new(&lookup, "IMAGES");
    let images = ImagePolicy {
        allowed_repos: s.list("ALLOWED_REPOS"),
        denied_repos: s.list("DENIED_REPOS"),
        allowed_tags: s.list("ALLOWED_TAGS"),
        denied_tags: s.list("DENIED_TAGS"),
    };
    let images = s.finish(images);

    ContentPolicy {
        volumes,
        containers,
        networks,
        images,
    }
}

/// True when `DKRPRX__DISABLE_DEFAULTS` is set to a truthy switch value.
pub fn defaults_disabled<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{ENV_PREFIX}DISABLE_DEFAULTS")).is_some_and(|v| parse_switch(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn list_separator_priority() {
        assert_eq!(split_list("a,b|c"), vec!["a,b", "c"]);
        assert_eq!(split_list("a,b;c"), vec!["a,b", "c"]);
        assert_eq!(split_list(" a , ,b "), vec!["a", "b"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn pairs_skip_malformed_entries() {
        let pairs = split_pairs("env=prod, team = infra ,bogus,=x,empty=");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["env"], "prod");
        assert_eq!(pairs["team"], "infra");
        assert_eq!(pairs["empty"], "");
    }

    #[test]
    fn access_flag_values() {
        assert!(parse_access_flag("YES", false));
        assert!(parse_access_flag("1", false));
        assert!(!parse_access_flag("No", true));
        assert!(!parse_access_flag("0", true));
        assert!(parse_access_flag("maybe", true));
        assert!(!parse_access_flag("on", false), "'on' is not an access flag value");
    }

    #[test]
    fn switch_values() {
        assert!(parse_switch("on"));
        assert!(parse_switch(" TRUE "));
        assert!(!parse_switch("off"));
        assert!(!parse_switch("2"));
    }

    #[test]
    fn access_defaults_when_unset() {
        let p = access_policy_from_env(env(&[]));
        assert!(p.events && p.ping && p.version);
        assert!(!p.containers && !p.images && !p.volumes);
        assert!(p.is_read_only());
    }

    #[test]
    fn access_flags_override_defaults() {
        let p = access_policy_from_env(env(&[
            ("CONTAINERS", "1"),
            ("PING", "0"),
            ("POST", "true"),
            ("DELETE", "garbage"),
            ("EVENTS", ""),
        ]));
        assert!(p.containers);
        assert!(!p.ping);
        assert!(p.post);
        assert!(!p.delete);
        assert!(p.events, "empty value keeps the default");
    }

    #[test]
    fn no_variables_means_no_sub_policies() {
        assert!(content_policy_from_env(env(&[])).is_empty());
    }

    #[test]
    fn sub_policy_present_only_when_a_variable_is_set() {
        let p = content_policy_from_env(env(&[
            ("DKRPRX__VOLUMES__DENIED_PATHS", "^/var/run/docker\\.sock$|^/etc"),
            ("DKRPRX__IMAGES__ALLOWED_TAGS", " , "),
        ]));
        let volumes = p.volumes.expect("volume sub-policy");
        assert_eq!(volumes.denied_paths, vec!["^/var/run/docker\\.sock$", "^/etc"]);
        assert!(p.images.is_none(), "a value with no items does not count");
        assert!(p.containers.is_none());
        assert!(p.networks.is_none());
    }

    #[test]
    fn container_switches_and_labels() {
        let p = content_policy_from_env(env(&[
            ("DKRPRX__CONTAINERS__DENY_PRIVILEGED", "off"),
            ("DKRPRX__CONTAINERS__REQUIRE_LABELS", "env=prod;team=infra"),
        ]));
        let c = p.containers.expect("container sub-policy");
        assert!(!c.deny_privileged, "'off' still creates the sub-policy");
        assert!(!c.deny_host_network);
        assert_eq!(c.require_labels.len(), 2);
    }

    #[test]
    fn disable_defaults_switch() {
        assert!(!defaults_disabled(env(&[])));
        assert!(defaults_disabled(env(&[("DKRPRX__DISABLE_DEFAULTS", "on")])));
        assert!(!defaults_disabled(env(&[("DKRPRX__DISABLE_DEFAULTS", "nope")])));
    }
}
