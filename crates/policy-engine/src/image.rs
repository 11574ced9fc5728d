use std::fmt;

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// An image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Split `reference` on its first colon. Without a colon the tag is
/// [`DEFAULT_TAG`].
///
/// A registry port is not special-cased: `host:5000/app` yields repository
/// `host` and tag `5000/app`.
pub fn parse_image_name(reference: &str) -> ImageRef {
    match reference.split_once(':') {
        Some((repository, tag)) => ImageRef {
            repository: repository.to_string(),
            tag: tag.to_string(),
        },
        None => ImageRef {
            repository: reference.to_string(),
            tag: DEFAULT_TAG.to_string(),
        },
    }
}
