use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{DeployError, DeployResult};

pub const SLUG_PATTERN: &str = "^[A-Za-z][A-Za-z0-9_-]*$";
pub const MAX_SLUG_LEN: usize = 128;

fn slug_regex() -> Option<&'static Regex> {
    static SLUG_RE: OnceLock<Option<Regex>> = OnceLock::new();
    SLUG_RE.get_or_init(|| Regex::new(SLUG_PATTERN).ok()).as_ref()
}

/// Whether `raw` is an acceptable function name.
pub fn is_valid_slug(raw: &str) -> bool {
    raw.len() <= MAX_SLUG_LEN && slug_regex().is_some_and(|re| re.is_match(raw))
}

/// A function name that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionSlug(String);

impl FunctionSlug {
    pub fn parse(raw: &str) -> DeployResult<Self> {
        if !is_valid_slug(raw) {
            return Err(DeployError::InvalidSlug {
                slug: raw.to_string(),
                pattern: SLUG_PATTERN,
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FunctionSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
