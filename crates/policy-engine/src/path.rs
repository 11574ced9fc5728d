use std::borrow::Cow;
use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::error::PolicyError;

/// Leading API-version segment such as `/v1.41`.
fn version_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/v\d+\.\d+").expect("static version regex is valid"))
}

/// Strip a leading `/vMAJOR.MINOR` segment from an API path.
///
/// Only the first segment is removed; anything else is returned unchanged.
/// `/v1.41/containers/json` and `/containers/json` both normalize to
/// `/containers/json`.
pub fn strip_api_version(path: &str) -> &str {
    match version_prefix().find(path) {
        Some(m) => &path[m.end()..],
        None => path,
    }
}

/// Percent-decode a raw request path exactly once, the way the engine's
/// router sees it. Every policy check must run on the decoded form.
pub fn decode_path(raw: &str) -> Result<Cow<'_, str>, PolicyError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| PolicyError::InvalidPath)
}
