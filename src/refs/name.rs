//! Validated reference names.
//!
//! # Ref hierarchy
//!
//! ```text
//! HEAD            ← symbolic ref to a branch (or a commit when detached)
//! heads/
//! │   └── <branch>
//! tags/
//!     └── <tag>   ← lightweight tag, or pointer to an annotated tag object
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The well-known symbolic ref naming the current branch.
pub const HEAD: &str = "HEAD";

/// Prefix for branch refs.
pub const HEADS_PREFIX: &str = "heads/";

/// Prefix for tag refs.
pub const TAGS_PREFIX: &str = "tags/";

/// A validated hierarchical reference name.
///
/// Names are `/`-separated components. `HEAD` is the only bare name that
/// carries special meaning; it is still resolved through the ordinary
/// symbolic-ref mechanism.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    /// Create a new `RefName`.
    ///
    /// # Errors
    /// Returns [`RefNameError`] if any component is empty, `.`/`..`, starts
    /// with `.`, ends with `.lock`, or contains whitespace, control
    /// characters, or one of `~ ^ : ? * [ \`.
    pub fn new(name: &str) -> Result<Self, RefNameError> {
        validate(name)?;
        Ok(Self(name.to_owned()))
    }

    /// The `HEAD` ref.
    #[must_use]
    pub fn head() -> Self {
        Self(HEAD.to_owned())
    }

    /// `heads/<branch>`.
    ///
    /// # Errors
    /// Returns [`RefNameError`] if the branch name is invalid.
    pub fn branch(branch: &str) -> Result<Self, RefNameError> {
        Self::new(&format!("{HEADS_PREFIX}{branch}"))
    }

    /// `tags/<tag>`.
    ///
    /// # Errors
    /// Returns [`RefNameError`] if the tag name is invalid.
    pub fn tag(tag: &str) -> Result<Self, RefNameError> {
        Self::new(&format!("{TAGS_PREFIX}{tag}"))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for `HEAD`.
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.0 == HEAD
    }

    /// `true` for `heads/*`.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.0.starts_with(HEADS_PREFIX)
    }

    /// The name without its `heads/` or `tags/` prefix.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.0
            .strip_prefix(HEADS_PREFIX)
            .or_else(|| self.0.strip_prefix(TAGS_PREFIX))
            .unwrap_or(&self.0)
    }

    /// Iterate over `/`-separated components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// `true` if `self` names a directory that `other` lives under
    /// (`heads/a` is a directory prefix of `heads/a/b`).
    #[must_use]
    pub fn is_directory_of(&self, other: &Self) -> bool {
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn validate(name: &str) -> Result<(), RefNameError> {
    let fail = |reason: &str| {
        Err(RefNameError {
            value: name.to_owned(),
            reason: reason.to_owned(),
        })
    };
    if name.is_empty() {
        return fail("ref name must not be empty");
    }
    for component in name.split('/') {
        if component.is_empty() {
            return fail("ref name must not contain empty components");
        }
        if component.starts_with('.') {
            return fail("components must not start with '.'");
        }
        if component.ends_with(".lock") {
            return fail("components must not end with '.lock'");
        }
    }
    if name.contains("..") || name.contains("@{") {
        return fail("ref name must not contain '..' or '@{'");
    }
    if let Some(bad) = name.chars().find(|c| {
        c.is_whitespace() || c.is_control() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\')
    }) {
        return Err(RefNameError {
            value: name.to_owned(),
            reason: format!("ref name must not contain {bad:?}"),
        });
    }
    Ok(())
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefName {
    type Err = RefNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for RefName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RefName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Error from validating a [`RefName`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid ref name {value:?}: {reason}")]
pub struct RefNameError {
    /// The invalid value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["HEAD", "heads/main", "tags/v1.0", "heads/feature/login", "remotes/x"] {
            assert!(RefName::new(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn invalid_names() {
        for name in [
            "",
            "heads/",
            "/heads",
            "heads//main",
            "heads/.hidden",
            "heads/main.lock",
            "heads/a..b",
            "heads/with space",
            "heads/tab\t",
            "heads/x~1",
            "heads/x^",
            "heads/a:b",
            "heads/*",
            "heads/[",
            "heads/back\\slash",
            "heads/at@{1}",
        ] {
            assert!(RefName::new(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn branch_and_tag_helpers() {
        let b = RefName::branch("main").unwrap();
        assert_eq!(b.as_str(), "heads/main");
        assert!(b.is_branch());
        assert_eq!(b.short_name(), "main");
        let t = RefName::tag("v1.0").unwrap();
        assert_eq!(t.as_str(), "tags/v1.0");
        assert!(!t.is_branch());
        assert_eq!(t.short_name(), "v1.0");
        assert!(RefName::head().is_head());
    }

    #[test]
    fn directory_prefix() {
        let dir = RefName::new("heads/a").unwrap();
        assert!(dir.is_directory_of(&RefName::new("heads/a/b").unwrap()));
        assert!(!dir.is_directory_of(&RefName::new("heads/ab").unwrap()));
        assert!(!dir.is_directory_of(&dir));
    }
}
