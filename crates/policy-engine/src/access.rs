use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::path::strip_api_version;

/// Coarse access flags: one per API resource category and one per mutating
/// HTTP method class.
///
/// The derived [`Default`] denies everything. Read methods (GET, HEAD) are not
/// represented because they always pass the method gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    pub events: bool,
    pub ping: bool,
    pub version: bool,
    pub auth: bool,
    pub build: bool,
    pub commit: bool,
    pub configs: bool,
    pub containers: bool,
    pub distribution: bool,
    pub exec: bool,
    pub images: bool,
    pub info: bool,
    pub networks: bool,
    pub nodes: bool,
    pub plugins: bool,
    pub secrets: bool,
    pub services: bool,
    pub session: bool,
    pub swarm: bool,
    pub system: bool,
    pub tasks: bool,
    pub volumes: bool,
    /// Gates POST.
    pub post: bool,
    /// Gates DELETE.
    pub delete: bool,
    /// Gates PUT and PATCH.
    pub put: bool,
}

impl AccessPolicy {
    /// Flag governing `category`.
    pub fn category_allowed(&self, category: Category) -> bool {
        match category {
            Category::Ping => self.ping,
            Category::Events => self.events,
            Category::Version => self.version,
            Category::Auth => self.auth,
            Category::Build => self.build,
            Category::Commit => self.commit,
            Category::Configs => self.configs,
            Category::Containers => self.containers,
            Category::Distribution => self.distribution,
            Category::Exec => self.exec,
            Category::Images => self.images,
            Category::Info => self.info,
            Category::Networks => self.networks,
            Category::Nodes => self.nodes,
            Category::Plugins => self.plugins,
            Category::Secrets => self.secrets,
            Category::Services => self.services,
            Category::Session => self.session,
            Category::Swarm => self.swarm,
            Category::System => self.system,
            Category::Tasks => self.tasks,
            Category::Volumes => self.volumes,
        }
    }

    /// Mutable access to the flag governing `category`, used by configuration
    /// loaders that fill the policy category by category.
    pub fn category_flag_mut(&mut self, category: Category) -> &mut bool {
        match category {
            Category::Ping => &mut self.ping,
            Category::Events => &mut self.events,
            Category::Version => &mut self.version,
            Category::Auth => &mut self.auth,
            Category::Build => &mut self.build,
            Category::Commit => &mut self.commit,
            Category::Configs => &mut self.configs,
            Category::Containers => &mut self.containers,
            Category::Distribution => &mut self.distribution,
            Category::Exec => &mut self.exec,
            Category::Images => &mut self.images,
            Category::Info => &mut self.info,
            Category::Networks => &mut self.networks,
            Category::Nodes => &mut self.nodes,
            Category::Plugins => &mut self.plugins,
            Category::Secrets => &mut self.secrets,
            Category::Services => &mut self.services,
            Category::Session => &mut self.session,
            Category::Swarm => &mut self.swarm,
            Category::System => &mut self.system,
            Category::Tasks => &mut self.tasks,
            Category::Volumes => &mut self.volumes,
        }
    }

    /// Whether `class` passes the method gate.
    pub fn method_allowed(&self, class: MethodClass) -> bool {
        match class {
            MethodClass::Read => true,
            MethodClass::Create => self.post,
            MethodClass::Delete => self.delete,
            MethodClass::Update => self.put,
        }
    }

    /// Names of the categories whose flag is set, in matching order.
    pub fn granted_categories(&self) -> Vec<&'static str> {
        Category::ALL
            .iter()
            .filter(|c| self.category_allowed(**c))
            .map(|c| c.name())
            .collect()
    }

    /// HTTP methods that pass the method gate.
    pub fn allowed_methods(&self) -> Vec<&'static str> {
        let mut methods = vec!["GET", "HEAD"];
        if self.post {
            methods.push("POST");
        }
        if self.delete {
            methods.push("DELETE");
        }
        if self.put {
            methods.extend(["PUT", "PATCH"]);
        }
        methods
    }

    /// True when no mutating method is enabled.
    pub fn is_read_only(&self) -> bool {
        !self.post && !self.delete && !self.put
    }
}

/// A Docker Engine API resource category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Ping,
    Events,
    Version,
    Auth,
    Build,
    Commit,
    Configs,
    Containers,
    Distribution,
    Exec,
    Images,
    Info,
    Networks,
    Nodes,
    Plugins,
    Secrets,
    Services,
    Session,
    Swarm,
    System,
    Tasks,
    Volumes,
}

impl Category {
    /// Every category in matching priority order.
    pub const ALL: [Category; 22] = [
        Category::Ping,
        Category::Events,
        Category::Version,
        Category::Auth,
        Category::Build,
        Category::Commit,
        Category::Configs,
        Category::Containers,
        Category::Distribution,
        Category::Exec,
        Category::Images,
        Category::Info,
        Category::Networks,
        Category::Nodes,
        Category::Plugins,
        Category::Secrets,
        Category::Services,
        Category::Session,
        Category::Swarm,
        Category::System,
        Category::Tasks,
        Category::Volumes,
    ];

    /// Path prefix (after version stripping) that selects this category.
    pub fn prefix(self) -> &'static str {
        match self {
            Category::Ping => "/_ping",
            Category::Events => "/events",
            Category::Version => "/version",
            Category::Auth => "/auth",
            Category::Build => "/build",
            Category::Commit => "/commit",
            Category::Configs => "/configs",
            Category::Containers => "/containers",
            Category::Distribution => "/distribution",
            Category::Exec => "/exec",
            Category::Images => "/images",
            Category::Info => "/info",
            Category::Networks => "/networks",
            Category::Nodes => "/nodes",
            Category::Plugins => "/plugins",
            Category::Secrets => "/secrets",
            Category::Services => "/services",
            Category::Session => "/session",
            Category::Swarm => "/swarm",
            Category::System => "/system",
            Category::Tasks => "/tasks",
            Category::Volumes => "/volumes",
        }
    }

    /// Upper-case name, matching the environment variable that sets the flag.
    pub fn name(self) -> &'static str {
        match self {
            Category::Ping => "PING",
            Category::Events => "EVENTS",
            Category::Version => "VERSION",
            Category::Auth => "AUTH",
            Category::Build => "BUILD",
            Category::Commit => "COMMIT",
            Category::Configs => "CONFIGS",
            Category::Containers => "CONTAINERS",
            Category::Distribution => "DISTRIBUTION",
            Category::Exec => "EXEC",
            Category::Images => "IMAGES",
            Category::Info => "INFO",
            Category::Networks => "NETWORKS",
            Category::Nodes => "NODES",
            Category::Plugins => "PLUGINS",
            Category::Secrets => "SECRETS",
            Category::Services => "SERVICES",
            Category::Session => "SESSION",
            Category::Swarm => "SWARM",
            Category::System => "SYSTEM",
            Category::Tasks => "TASKS",
            Category::Volumes => "VOLUMES",
        }
    }
}

/// Method classes the coarse gate distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// GET, HEAD
    Read,
    /// POST
    Create,
    /// DELETE
    Delete,
    /// PUT, PATCH
    Update,
}

impl MethodClass {
    /// Classify an HTTP method name (case-insensitive). Unknown methods yield
    /// `None`.
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Some(MethodClass::Read),
            "POST" => Some(MethodClass::Create),
            "DELETE" => Some(MethodClass::Delete),
            "PUT" | "PATCH" => Some(MethodClass::Update),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CategoryRule {
    category: Category,
    prefix: &'static str,
    allowed: bool,
}

/// Coarse method + path admission check.
///
/// The category table is an ordered list resolved from an [`AccessPolicy`]
/// once at construction; the first prefix that matches decides.
#[derive(Debug, Clone)]
pub struct AccessMatcher {
    policy: AccessPolicy,
    rules: Vec<CategoryRule>,
}

impl AccessMatcher {
    pub fn new(policy: AccessPolicy) -> Self {
        let rules = Category::ALL
            .iter()
            .map(|&category| CategoryRule {
                category,
                prefix: category.prefix(),
                allowed: policy.category_allowed(category),
            })
            .collect();
        Self { policy, rules }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Category governing `path`, if any. The path may carry a version prefix.
    pub fn classify(&self, path: &str) -> Option<Category> {
        let path = strip_api_version(path);
        self.rules
            .iter()
            .find(|r| path.starts_with(r.prefix))
            .map(|r| r.category)
    }

    /// Decide whether `method` on `path` passes the coarse policy.
    ///
    /// Unknown methods and paths outside every category are denied.
    pub fn is_allowed(&self, method: &str, path: &str) -> bool {
        let Some(class) = MethodClass::parse(method) else {
            trace!(method, "unknown method denied");
            return false;
        };
        if !self.policy.method_allowed(class) {
            trace!(method, "method class disabled");
            return false;
        }

        let normalized = strip_api_version(path);
        match self.rules.iter().find(|r| normalized.starts_with(r.prefix)) {
            Some(rule) => {
                trace!(category = rule.category.name(), allowed = rule.allowed, "category matched");
                rule.allowed
            }
            None => {
                trace!(path = normalized, "no category matched");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(policy: AccessPolicy) -> AccessMatcher {
        AccessMatcher::new(policy)
    }

    fn all_open() -> AccessPolicy {
        let mut p = AccessPolicy {
            post: true,
            delete: true,
            put: true,
            ..AccessPolicy::default()
        };
        for c in Category::ALL {
            *p.category_flag_mut(c) = true;
        }
        p
    }

    // ---- method gate ----

    #[test]
    fn read_methods_always_pass_method_gate() {
        let m = matcher(AccessPolicy {
            containers: true,
            ..AccessPolicy::default()
        });
        assert!(m.is_allowed("GET", "/containers/json"));
        assert!(m.is_allowed("HEAD", "/containers/json"));
        assert!(m.is_allowed("get", "/containers/json"));
    }

    #[test]
    fn read_methods_ignore_mutating_flags() {
        let closed = matcher(AccessPolicy {
            images: true,
            ..AccessPolicy::default()
        });
        let open = matcher(AccessPolicy {
            images: true,
            post: true,
            delete: true,
            put: true,
            ..AccessPolicy::default()
        });
        for method in ["GET", "HEAD"] {
            assert_eq!(
                closed.is_allowed(method, "/images/json"),
                open.is_allowed(method, "/images/json")
            );
        }
    }

    #[test]
    fn mutating_methods_follow_their_flags() {
        let base = AccessPolicy {
            containers: true,
            ..AccessPolicy::default()
        };
        assert!(!matcher(base.clone()).is_allowed("POST", "/containers/create"));
        assert!(!matcher(base.clone()).is_allowed("DELETE", "/containers/abc"));
        assert!(!matcher(base.clone()).is_allowed("PUT", "/containers/abc/archive"));

        let m = matcher(AccessPolicy {
            post: true,
            delete: true,
            ..base.clone()
        });
        assert!(m.is_allowed("POST", "/containers/create"));
        assert!(m.is_allowed("DELETE", "/containers/abc"));
        assert!(!m.is_allowed("PUT", "/containers/abc/archive"));
    }

    #[test]
    fn put_and_patch_share_one_flag() {
        let m = matcher(AccessPolicy {
            services: true,
            put: true,
            ..AccessPolicy::default()
        });
        assert!(m.is_allowed("PUT", "/services/x/update"));
        assert!(m.is_allowed("PATCH", "/services/x/update"));

        let m = matcher(AccessPolicy {
            services: true,
            ..AccessPolicy::default()
        });
        assert!(!m.is_allowed("PATCH", "/services/x/update"));
    }

    #[test]
    fn unknown_methods_are_denied() {
        let m = matcher(all_open());
        assert!(!m.is_allowed("OPTIONS", "/containers/json"));
        assert!(!m.is_allowed("TRACE", "/_ping"));
        assert!(!m.is_allowed("", "/_ping"));
    }

    // ---- category table ----

    #[test]
    fn unknown_paths_are_denied_under_any_policy() {
        for policy in [AccessPolicy::default(), all_open()] {
            let m = matcher(policy);
            assert!(!m.is_allowed("GET", "/unknown"));
            assert!(!m.is_allowed("GET", "/"));
            assert!(!m.is_allowed("GET", ""));
            assert!(!m.is_allowed("GET", "/v1.41/unknown/json"));
        }
    }

    #[test]
    fn category_flag_is_the_decision() {
        let m = matcher(AccessPolicy {
            ping: true,
            version: true,
            ..AccessPolicy::default()
        });
        assert!(m.is_allowed("GET", "/_ping"));
        assert!(m.is_allowed("GET", "/version"));
        assert!(!m.is_allowed("GET", "/containers/json"));
        assert!(!m.is_allowed("GET", "/info"));
    }

    #[test]
    fn every_category_is_reachable() {
        for category in Category::ALL {
            let mut policy = AccessPolicy::default();
            *policy.category_flag_mut(category) = true;
            let m = matcher(policy);
            let path = format!("{}/anything", category.prefix());
            assert!(m.is_allowed("GET", &path), "{category:?} should be allowed");
            assert_eq!(m.classify(&path), Some(category));
        }
    }

    #[test]
    fn versioned_and_unversioned_paths_agree() {
        let m = matcher(AccessPolicy {
            containers: true,
            ..AccessPolicy::default()
        });
        assert!(m.is_allowed("GET", "/v1.41/containers/json"));
        assert!(m.is_allowed("GET", "/containers/json"));
        assert!(!m.is_allowed("GET", "/v1.41/images/json"));
    }

    #[test]
    fn prefix_match_is_anchored_to_path_start() {
        let m = matcher(AccessPolicy {
            containers: true,
            ..AccessPolicy::default()
        });
        assert!(m.is_allowed("GET", "/containers/json/extra"));
        assert!(!m.is_allowed("GET", "/x/containers/json"));
    }

    #[test]
    fn post_disabled_denies_container_create() {
        let m = matcher(AccessPolicy {
            containers: true,
            post: false,
            ..AccessPolicy::default()
        });
        assert!(!m.is_allowed("POST", "/v1.41/containers/create"));
    }

    #[test]
    fn table_order_is_stable() {
        let m = matcher(all_open());
        let order: Vec<Category> = m.rules.iter().map(|r| r.category).collect();
        assert_eq!(order, Category::ALL.to_vec());
    }

    // ---- reporting helpers ----

    #[test]
    fn granted_categories_and_methods() {
        let policy = AccessPolicy {
            ping: true,
            volumes: true,
            put: true,
            ..AccessPolicy::default()
        };
        assert_eq!(policy.granted_categories(), vec!["PING", "VOLUMES"]);
        assert_eq!(policy.allowed_methods(), vec!["GET", "HEAD", "PUT", "PATCH"]);
        assert!(!policy.is_read_only());
        assert!(AccessPolicy::default().is_read_only());
    }
}
