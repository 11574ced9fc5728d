use thiserror::Error;

/// Errors raised while building or applying a content policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A configured pattern does not compile (strict pattern mode only).
    #[error("invalid pattern '{pattern}' in {field}: {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The request body is not valid JSON.
    #[error("request body is not valid JSON: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The request body is JSON but not an object.
    #[error("request body must be a JSON object")]
    BodyNotObject,

    /// Two keys of one object name the same field once case is ignored.
    #[error("request body has conflicting keys for field {field}")]
    AmbiguousField { field: &'static str },

    /// The request path percent-decodes to invalid UTF-8.
    #[error("request path is not valid UTF-8 once percent-decoded")]
    InvalidPath,
}
