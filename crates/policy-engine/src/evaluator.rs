use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::decision::{Denial, Dimension, FilterOutcome, ResourceKind};
use crate::error::PolicyError;
use crate::image::{parse_image_name, ImageRef};
use crate::matcher::DimensionRule;
use crate::request::{
    build_reference, decode_object, pull_reference, AdmissionRequest, ContainerSpec, NetworkSpec,
    Operation, VolumeSpec,
};
use crate::schema::{
    ContainerPolicy, ContentPolicy, ImagePolicy, NetworkPolicy, PatternMode, VolumePolicy,
};

// ---------------------------------------------------------------------------
// Compiled sub-policies
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledVolumePolicy {
    names: DimensionRule,
    paths: DimensionRule,
    allowed_drivers: Vec<String>,
}

impl CompiledVolumePolicy {
    fn compile(p: &VolumePolicy, mode: PatternMode) -> Result<Self, PolicyError> {
        Ok(Self {
            names: DimensionRule::compile("volumes", "names", &p.denied_names, &p.allowed_names, mode)?,
            paths: DimensionRule::compile("volumes", "paths", &p.denied_paths, &p.allowed_paths, mode)?,
            allowed_drivers: p.allowed_drivers.clone(),
        })
    }

    /// True when a passing `spec` matched at least one allow rule.
    fn grants(&self, spec: &VolumeSpec) -> bool {
        self.names.has_allow_list()
            || (spec.host_path.is_some() && self.paths.has_allow_list())
            || (!spec.driver.is_empty() && !self.allowed_drivers.is_empty())
    }
}

#[derive(Debug)]
struct CompiledContainerPolicy {
    images: DimensionRule,
    names: DimensionRule,
    require_labels: BTreeMap<String, String>,
    deny_privileged: bool,
    deny_host_network: bool,
}

impl CompiledContainerPolicy {
    fn compile(p: &ContainerPolicy, mode: PatternMode) -> Result<Self, PolicyError> {
        Ok(Self {
            images: DimensionRule::compile(
                "containers",
                "images",
                &p.denied_images,
                &p.allowed_images,
                mode,
            )?,
            names: DimensionRule::compile("containers", "names", &p.denied_names, &p.allowed_names, mode)?,
            require_labels: p.require_labels.clone(),
            deny_privileged: p.deny_privileged,
            deny_host_network: p.deny_host_network,
        })
    }

    /// True when a passing `spec` matched at least one allow rule or
    /// carried every required label. Deny switches never grant.
    fn grants(&self, spec: &ContainerSpec) -> bool {
        self.images.has_allow_list()
            || (spec.name.is_some() && self.names.has_allow_list())
            || !self.require_labels.is_empty()
    }
}

#[derive(Debug)]
struct CompiledNetworkPolicy {
    names: DimensionRule,
    allowed_drivers: Vec<String>,
}

impl CompiledNetworkPolicy {
    fn compile(p: &NetworkPolicy, mode: PatternMode) -> Result<Self, PolicyError> {
        Ok(Self {
            names: DimensionRule::compile("networks", "names", &p.denied_names, &p.allowed_names, mode)?,
            allowed_drivers: p.allowed_drivers.clone(),
        })
    }

    fn grants(&self, spec: &NetworkSpec) -> bool {
        self.names.has_allow_list() || (!spec.driver.is_empty() && !self.allowed_drivers.is_empty())
    }
}

#[derive(Debug)]
struct CompiledImagePolicy {
    repos: DimensionRule,
    tags: DimensionRule,
}

impl CompiledImagePolicy {
    fn compile(p: &ImagePolicy, mode: PatternMode) -> Result<Self, PolicyError> {
        Ok(Self {
            repos: DimensionRule::compile("images", "repos", &p.denied_repos, &p.allowed_repos, mode)?,
            tags: DimensionRule::compile("images", "tags", &p.denied_tags, &p.allowed_tags, mode)?,
        })
    }

    fn grants(&self, reference: &ImageRef) -> bool {
        self.repos.has_allow_list() || (!reference.tag.is_empty() && self.tags.has_allow_list())
    }
}

// ---------------------------------------------------------------------------
// ContentFilter
// ---------------------------------------------------------------------------

/// Fine-grained filter over the attributes of create, pull and build
/// requests.
///
/// Construct via [`ContentFilter::new`], which compiles every pattern once.
/// The filter is immutable afterwards and safe to share between tasks.
#[derive(Debug, Default)]
pub struct ContentFilter {
    volumes: Option<CompiledVolumePolicy>,
    containers: Option<CompiledContainerPolicy>,
    networks: Option<CompiledNetworkPolicy>,
    images: Option<CompiledImagePolicy>,
}

impl ContentFilter {
    /// Compile `policy`. Only [`PatternMode::Strict`] can fail.
    pub fn new(policy: &ContentPolicy, mode: PatternMode) -> Result<Self, PolicyError> {
        Ok(Self {
            volumes: policy
                .volumes
                .as_ref()
                .map(|p| CompiledVolumePolicy::compile(p, mode))
                .transpose()?,
            containers: policy
                .containers
                .as_ref()
                .map(|p| CompiledContainerPolicy::compile(p, mode))
                .transpose()?,
            networks: policy
                .networks
                .as_ref()
                .map(|p| CompiledNetworkPolicy::compile(p, mode))
                .transpose()?,
            images: policy
                .images
                .as_ref()
                .map(|p| CompiledImagePolicy::compile(p, mode))
                .transpose()?,
        })
    }

    /// Evaluate one request.
    ///
    /// Requests that are not a create, pull or build, or whose resource kind
    /// has no sub-policy, yield [`FilterOutcome::NoOpinion`] without touching
    /// the body. A body that must be inspected but is not a JSON object is an
    /// error.
    pub fn evaluate(&self, req: &AdmissionRequest<'_>) -> Result<FilterOutcome, PolicyError> {
        let Some(op) = Operation::classify(req.method, req.path) else {
            return Ok(FilterOutcome::NoOpinion);
        };
        debug!(?op, path = req.path, "evaluating request content");

        let outcome = match op {
            Operation::CreateContainer => {
                if self.containers.is_none() && self.images.is_none() {
                    return Ok(FilterOutcome::NoOpinion);
                }
                let doc = decode_object(req.body)?;
                let spec = ContainerSpec::from_document(&doc, req.query_param("name"))?;
                self.evaluate_container(&spec)
            }
            Operation::CreateVolume => match &self.volumes {
                None => FilterOutcome::NoOpinion,
                Some(policy) => {
                    let spec = VolumeSpec::from_document(&decode_object(req.body)?)?;
                    outcome_for(ResourceKind::Volume, check_volume(policy, &spec), policy.grants(&spec))
                }
            },
            Operation::CreateNetwork => match &self.networks {
                None => FilterOutcome::NoOpinion,
                Some(policy) => {
                    let spec = NetworkSpec::from_document(&decode_object(req.body)?)?;
                    outcome_for(
                        ResourceKind::Network,
                        check_network(policy, &spec),
                        policy.grants(&spec),
                    )
                }
            },
            Operation::PullImage => self.evaluate_image(&pull_reference(req)),
            Operation::BuildImage => match build_reference(req) {
                Some(reference) => self.evaluate_image(&reference),
                None => FilterOutcome::NoOpinion,
            },
        };

        trace!(?outcome, "content evaluation finished");
        Ok(outcome)
    }

    /// Check a volume against the volume sub-policy.
    pub fn check_volume(&self, spec: &VolumeSpec) -> Result<(), Denial> {
        match &self.volumes {
            Some(policy) => check_volume(policy, spec),
            None => Ok(()),
        }
    }

    /// Check a container against the container sub-policy and, for its image,
    /// the image sub-policy.
    pub fn check_container(&self, spec: &ContainerSpec) -> Result<(), Denial> {
        if let Some(policy) = &self.containers {
            check_container(policy, spec)?;
        }
        if let Some(policy) = &self.images {
            check_image(policy, &parse_image_name(&spec.image))?;
        }
        Ok(())
    }

    /// Check a network against the network sub-policy.
    pub fn check_network(&self, spec: &NetworkSpec) -> Result<(), Denial> {
        match &self.networks {
            Some(policy) => check_network(policy, spec),
            None => Ok(()),
        }
    }

    /// Check an image reference against the image sub-policy.
    pub fn check_image(&self, reference: &ImageRef) -> Result<(), Denial> {
        match &self.images {
            Some(policy) => check_image(policy, reference),
            None => Ok(()),
        }
    }

    fn evaluate_container(&self, spec: &ContainerSpec) -> FilterOutcome {
        if let Some(policy) = &self.containers {
            if let Err(denial) = check_container(policy, spec) {
                return FilterOutcome::Denied {
                    kind: ResourceKind::Container,
                    denial,
                };
            }
        }
        if let Some(policy) = &self.images {
            if let Err(denial) = check_image(policy, &parse_image_name(&spec.image)) {
                return FilterOutcome::Denied {
                    kind: ResourceKind::Image,
                    denial,
                };
            }
        }
        let granted = self.containers.as_ref().is_some_and(|p| p.grants(spec))
            || self
                .images
                .as_ref()
                .is_some_and(|p| p.grants(&parse_image_name(&spec.image)));
        outcome_for(ResourceKind::Container, Ok(()), granted)
    }

    fn evaluate_image(&self, reference: &ImageRef) -> FilterOutcome {
        match &self.images {
            None => FilterOutcome::NoOpinion,
            Some(policy) => outcome_for(
                ResourceKind::Image,
                check_image(policy, reference),
                policy.grants(reference),
            ),
        }
    }
}

/// A pass only counts as an authorization when an allow rule matched. A
/// request that merely escaped every deny list gets no opinion.
fn outcome_for(kind: ResourceKind, result: Result<(), Denial>, granted: bool) -> FilterOutcome {
    match result {
        Err(denial) => FilterOutcome::Denied { kind, denial },
        Ok(()) if granted => FilterOutcome::Authorized(kind),
        Ok(()) => FilterOutcome::NoOpinion,
    }
}

// ---------------------------------------------------------------------------
// Per-kind checks
// ---------------------------------------------------------------------------

fn check_volume(policy: &CompiledVolumePolicy, spec: &VolumeSpec) -> Result<(), Denial> {
    policy.names.check(Dimension::VolumeName, &spec.name)?;
    if let Some(path) = &spec.host_path {
        policy.paths.check(Dimension::HostPath, path)?;
    }
    check_driver(ResourceKind::Volume, &policy.allowed_drivers, &spec.driver)
}

fn check_container(policy: &CompiledContainerPolicy, spec: &ContainerSpec) -> Result<(), Denial> {
    policy.images.check(Dimension::Image, &spec.image)?;
    if let Some(name) = &spec.name {
        policy.names.check(Dimension::ContainerName, name)?;
    }
    if policy.deny_privileged && spec.privileged {
        return Err(Denial::Privileged);
    }
    if policy.deny_host_network && spec.network_mode.as_deref() == Some("host") {
        return Err(Denial::HostNetwork);
    }
    check_required_labels(&policy.require_labels, spec.labels.as_ref())
}

fn check_required_labels(
    required: &BTreeMap<String, String>,
    declared: Option<&BTreeMap<String, String>>,
) -> Result<(), Denial> {
    if required.is_empty() {
        return Ok(());
    }
    let Some(declared) = declared else {
        return Err(Denial::LabelsMissing);
    };
    for (key, value) in required {
        if declared.get(key) != Some(value) {
            return Err(Denial::LabelMismatch { key: key.clone() });
        }
    }
    Ok(())
}

fn check_network(policy: &CompiledNetworkPolicy, spec: &NetworkSpec) -> Result<(), Denial> {
    policy.names.check(Dimension::NetworkName, &spec.name)?;
    check_driver(ResourceKind::Network, &policy.allowed_drivers, &spec.driver)
}

fn check_image(policy: &CompiledImagePolicy, reference: &ImageRef) -> Result<(), Denial> {
    policy.repos.check(Dimension::ImageRepository, &reference.repository)?;
    if !reference.tag.is_empty() {
        policy.tags.check(Dimension::ImageTag, &reference.tag)?;
    }
    Ok(())
}

/// Exact-match driver check; skipped when no driver is declared or the
/// allowed set is empty.
fn check_driver(kind: ResourceKind, allowed: &[String], driver: &str) -> Result<(), Denial> {
    if driver.is_empty() || allowed.is_empty() || allowed.iter().any(|d| d == driver) {
        return Ok(());
    }
    Err(Denial::DriverNotAllowed {
        kind,
        driver: driver.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
