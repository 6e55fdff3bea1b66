//! Image references (`repo[:tag][@digest]`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Tag used when a reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

/// A parsed image reference.
///
/// References to the default registry are normalized, so `busybox`,
/// `docker.io/busybox` and `docker.io/library/busybox:latest` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repo: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageRef {
    /// Builds a reference from a repository and an optional tag.
    pub fn new(repo: &str, tag: Option<&str>) -> Result<Self, ParseError> {
        let mut image: ImageRef = repo.parse()?;
        if let Some(tag) = tag {
            validate_tag(repo, tag)?;
            image.tag = tag.to_string();
        }
        Ok(image)
    }

    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::Empty { property: "image" });
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid(input, "digest must be algorithm:hex"));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash separates the tag; one before it is a
        // registry port.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (repo, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        if repo.is_empty() {
            return Err(invalid(input, "repository is empty"));
        }
        if repo.chars().any(|c| c.is_whitespace() || c.is_ascii_uppercase()) {
            return Err(invalid(input, "repository must be lowercase without whitespace"));
        }

        let tag = match tag {
            Some(tag) => {
                validate_tag(input, tag)?;
                tag.to_string()
            }
            None => DEFAULT_TAG.to_string(),
        };

        Ok(Self {
            repo: normalize_repo(repo),
            tag,
            digest,
        })
    }
}

fn normalize_repo(repo: &str) -> String {
    let trimmed = repo
        .strip_prefix("index.docker.io/")
        .or_else(|| repo.strip_prefix("docker.io/"))
        .unwrap_or(repo);
    trimmed
        .strip_prefix("library/")
        .unwrap_or(trimmed)
        .to_string()
}

fn validate_tag(input: &str, tag: &str) -> Result<(), ParseError> {
    if tag.is_empty() {
        return Err(invalid(input, "tag is empty"));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(invalid(input, "tag is longer than 128 characters"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid(input, "tag contains invalid characters"));
    }
    Ok(())
}

fn invalid(input: &str, reason: &str) -> ParseError {
    ParseError::InvalidImage {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for ImageRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.digest {
            Some(digest) if self.tag == DEFAULT_TAG => write!(f, "{}@{}", self.repo, digest),
            Some(digest) => write!(f, "{}:{}@{}", self.repo, self.tag, digest),
            None => write!(f, "{}:{}", self.repo, self.tag),
        }
    }
}
