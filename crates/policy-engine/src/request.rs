//! Extraction of the few request attributes content rules look at.
//!
//! Bodies are decoded into a generic [`serde_json::Value`] and only a small,
//! explicit set of keys is read. A key that is missing or has the wrong type
//! is treated as absent, never as an error.
//!
//! The engine matches struct fields without regard to case, so `hostconfig`
//! and `HostConfig` name the same field. Lookups here fold case the same way
//! and refuse a document in which two keys fold to one field. Map contents
//! (`Labels`, `DriverOpts`) keep exact keys.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::PolicyError;
use crate::image::{parse_image_name, ImageRef};
use crate::path::strip_api_version;

/// One inbound request as seen by the admission gate.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub method: &'a str,
    /// URL path, with or without an API-version prefix. The gate
    /// percent-decodes it before any rule sees it.
    pub path: &'a str,
    /// Raw query string without the leading `?`.
    pub query: Option<&'a str>,
    /// Fully buffered request body.
    pub body: &'a [u8],
}

impl<'a> AdmissionRequest<'a> {
    pub fn new(method: &'a str, path: &'a str) -> Self {
        Self {
            method,
            path,
            query: None,
            body: &[],
        }
    }

    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_body(mut self, body: &'a [u8]) -> Self {
        self.body = body;
        self
    }

    /// First value of query parameter `key`, percent-decoded.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// The create/build operation a request performs, if content rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateContainer,
    CreateVolume,
    CreateNetwork,
    PullImage,
    BuildImage,
}

impl Operation {
    /// Classify a request by method and decoded path. Only POST and PUT are
    /// candidates, and the whole path after the version prefix must name the
    /// endpoint.
    pub fn classify(method: &str, path: &str) -> Option<Self> {
        if !method.eq_ignore_ascii_case("POST") && !method.eq_ignore_ascii_case("PUT") {
            return None;
        }
        match strip_api_version(path).trim_end_matches('/') {
            "/containers/create" => Some(Operation::CreateContainer),
            "/volumes/create" => Some(Operation::CreateVolume),
            "/networks/create" => Some(Operation::CreateNetwork),
            "/images/create" => Some(Operation::PullImage),
            "/build" => Some(Operation::BuildImage),
            _ => None,
        }
    }

    /// True when content rules for this operation read the request body.
    /// Pulls and builds are judged from the query string alone.
    pub fn inspects_body(self) -> bool {
        matches!(
            self,
            Operation::CreateContainer | Operation::CreateVolume | Operation::CreateNetwork
        )
    }
}

/// Attributes of a container-create request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// `Image`; empty when missing.
    pub image: String,
    /// `name` query parameter.
    pub name: Option<String>,
    /// `HostConfig.Privileged`.
    pub privileged: bool,
    /// `HostConfig.NetworkMode`.
    pub network_mode: Option<String>,
    /// `Labels`, keeping only string values. `None` when the key is absent or
    /// not an object.
    pub labels: Option<BTreeMap<String, String>>,
}

impl ContainerSpec {
    pub fn from_document(
        doc: &Map<String, Value>,
        name: Option<String>,
    ) -> Result<Self, PolicyError> {
        let (privileged, network_mode) = match field(doc, "HostConfig")?.and_then(Value::as_object) {
            Some(hc) => (
                field(hc, "Privileged")?.and_then(Value::as_bool).unwrap_or(false),
                str_field(hc, "NetworkMode")?,
            ),
            None => (false, None),
        };
        Ok(Self {
            image: str_field(doc, "Image")?.unwrap_or_default(),
            name: name.filter(|n| !n.is_empty()),
            privileged,
            network_mode,
            labels: field(doc, "Labels")?.and_then(Value::as_object).map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            }),
        })
    }
}

/// Attributes of a volume-create request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub driver: String,
    /// Host path backing the volume, from `DriverOpts`.
    pub host_path: Option<String>,
}

impl VolumeSpec {
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self, PolicyError> {
        Ok(Self {
            name: str_field(doc, "Name")?.unwrap_or_default(),
            driver: str_field(doc, "Driver")?.unwrap_or_default(),
            host_path: field(doc, "DriverOpts")?
                .and_then(Value::as_object)
                .and_then(host_path_from_driver_opts),
        })
    }
}

/// `device=` in the `o` option string wins over a plain `device` option.
fn host_path_from_driver_opts(opts: &Map<String, Value>) -> Option<String> {
    let option = |key: &str| opts.get(key).and_then(Value::as_str);
    let from_options = option("o").and_then(|o| {
        o.split_once("device=")
            .map(|(_, rest)| rest.split(',').next().unwrap_or_default())
    });
    from_options
        .or_else(|| option("device"))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Attributes of a network-create request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
}

impl NetworkSpec {
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self, PolicyError> {
        Ok(Self {
            name: str_field(doc, "Name")?.unwrap_or_default(),
            driver: str_field(doc, "Driver")?.unwrap_or_default(),
        })
    }
}

/// Image reference of a pull: `fromImage`, with `tag` appended when given.
pub fn pull_reference(req: &AdmissionRequest<'_>) -> ImageRef {
    let mut reference = req.query_param("fromImage").unwrap_or_default();
    if let Some(tag) = req.query_param("tag").filter(|t| !t.is_empty()) {
        reference.push(':');
        reference.push_str(&tag);
    }
    parse_image_name(&reference)
}

/// Image reference of a build, from `t`. `None` when no tag is requested.
pub fn build_reference(req: &AdmissionRequest<'_>) -> Option<ImageRef> {
    req.query_param("t")
        .filter(|t| !t.is_empty())
        .map(|t| parse_image_name(&t))
}

/// Decode a request body into a JSON object.
pub fn decode_object(body: &[u8]) -> Result<Map<String, Value>, PolicyError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(PolicyError::BodyNotObject),
    }
}

/// The value of struct field `name`, matching keys without regard to case.
fn field<'m>(
    map: &'m Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'m Value>, PolicyError> {
    let mut matches = map.iter().filter(|(key, _)| folds_to(key, name));
    let found = matches.next().map(|(_, value)| value);
    if matches.next().is_some() {
        return Err(PolicyError::AmbiguousField { field: name });
    }
    Ok(found)
}

fn str_field(map: &Map<String, Value>, name: &'static str) -> Result<Option<String>, PolicyError> {
    Ok(field(map, name)?.and_then(Value::as_str).map(str::to_string))
}

/// Case-insensitive comparison against an ASCII field name. The long s
/// (U+017F) and the Kelvin sign (U+212A) fold to `s` and `k`.
fn folds_to(key: &str, name: &str) -> bool {
    let fold = |c: char| match c {
        '\u{17F}' => 's',
        '\u{212A}' => 'k',
        c => c.to_ascii_lowercase(),
    };
    key.chars().map(fold).eq(name.chars().map(fold))
}
