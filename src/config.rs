//! Repository configuration (`config.toml`).
//!
//! ```toml
//! [identity]
//! name = "Ada"
//! email = "ada@example.com"
//!
//! [merge]
//! strategy = "three-way"
//! text_merge = true
//! binary_sniff_len = 8000
//!
//! [reflog]
//! max_entries = 1000
//! expiry_days = 90
//!
//! [refs]
//! max_symbolic_depth = 5
//! ```
//!
//! A missing file means all defaults. Unknown keys are rejected.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use grove_store::{Signature, StoreError};

use crate::merge::{DEFAULT_BINARY_SNIFF_LEN, MergeOptions, MergeStrategy};
use crate::refs::{DEFAULT_MAX_SYMBOLIC_DEPTH, RetentionPolicy};

const SECONDS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level repository configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroveConfig {
    /// Who commits, merges and moves references.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Merge settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Reflog retention.
    #[serde(default)]
    pub reflog: ReflogConfig,

    /// Reference store settings.
    #[serde(default)]
    pub refs: RefsConfig,
}

// ---------------------------------------------------------------------------
// IdentityConfig
// ---------------------------------------------------------------------------

/// Committer identity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Display name (default: `"grove"`).
    #[serde(default = "default_name")]
    pub name: String,

    /// Email (default: `"grove@localhost"`).
    #[serde(default = "default_email")]
    pub email: String,

    /// Timezone offset in minutes east of UTC.
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            email: default_email(),
            tz_offset_minutes: 0,
        }
    }
}

fn default_name() -> String {
    "grove".to_owned()
}

fn default_email() -> String {
    "grove@localhost".to_owned()
}

impl IdentityConfig {
    /// A signature for this identity at `timestamp`.
    ///
    /// # Errors
    /// [`StoreError::InvalidSignature`] if the name or email contains a
    /// forbidden character.
    pub fn signature(&self, timestamp: i64) -> Result<Signature, StoreError> {
        Signature::new(
            self.name.clone(),
            self.email.clone(),
            timestamp,
            self.tz_offset_minutes,
        )
    }
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge behaviour settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Default strategy.
    #[serde(default)]
    pub strategy: MergeStrategy,

    /// Line-level merging of text files changed on both sides.
    #[serde(default = "default_text_merge")]
    pub text_merge: bool,

    /// Leading bytes checked for NUL when deciding if content is binary.
    #[serde(default = "default_binary_sniff_len")]
    pub binary_sniff_len: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::default(),
            text_merge: default_text_merge(),
            binary_sniff_len: default_binary_sniff_len(),
        }
    }
}

const fn default_text_merge() -> bool {
    true
}

const fn default_binary_sniff_len() -> usize {
    DEFAULT_BINARY_SNIFF_LEN
}

impl MergeConfig {
    /// The merge engine options these settings describe.
    #[must_use]
    pub const fn options(&self) -> MergeOptions {
        MergeOptions {
            strategy: self.strategy,
            text_merge: self.text_merge,
            binary_sniff_len: self.binary_sniff_len,
        }
    }
}

// ---------------------------------------------------------------------------
// ReflogConfig
// ---------------------------------------------------------------------------

/// Reflog retention. Both limits unset keeps everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReflogConfig {
    /// Keep at most this many newest entries per reference.
    pub max_entries: Option<usize>,

    /// Drop entries older than this many days.
    pub expiry_days: Option<u32>,
}

impl ReflogConfig {
    /// The retention policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_entries: self.max_entries,
            max_age_secs: self
                .expiry_days
                .map(|days| i64::from(days) * SECONDS_PER_DAY),
        }
    }
}

// ---------------------------------------------------------------------------
// RefsConfig
// ---------------------------------------------------------------------------

/// Reference store settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefsConfig {
    /// Longest symbolic chain `resolve` follows.
    #[serde(default = "default_max_symbolic_depth")]
    pub max_symbolic_depth: usize,
}

impl Default for RefsConfig {
    fn default() -> Self {
        Self {
            max_symbolic_depth: default_max_symbolic_depth(),
        }
    }
}

const fn default_max_symbolic_depth() -> usize {
    DEFAULT_MAX_SYMBOLIC_DEPTH
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("{}: could not read file: {source}", path.display())]
    Read {
        /// The config file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML or an unknown key.
    #[error("{}: {message}", path.as_deref().map_or_else(|| "config".into(), Path::to_string_lossy))]
    Parse {
        /// The config file, if loaded from disk.
        path: Option<PathBuf>,
        /// Message with a line number when available.
        message: String,
    },
}

impl GroveConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    /// [`ConfigError`] on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: Some(path.to_owned()),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError::Parse {
                path: None,
                message,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = GroveConfig::default();
        assert_eq!(cfg.identity.name, "grove");
        assert_eq!(cfg.merge.strategy, MergeStrategy::ThreeWay);
        assert!(cfg.merge.text_merge);
        assert_eq!(cfg.merge.binary_sniff_len, 8000);
        assert_eq!(cfg.reflog.policy(), RetentionPolicy::keep_all());
        assert_eq!(cfg.refs.max_symbolic_depth, 5);
    }

    #[test]
    fn parse_empty_string() {
        assert_eq!(GroveConfig::parse("").unwrap(), GroveConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[identity]
name = "Ada"
email = "ada@example.com"
tz_offset_minutes = 60

[merge]
strategy = "theirs"
text_merge = false
binary_sniff_len = 512

[reflog]
max_entries = 10
expiry_days = 2

[refs]
max_symbolic_depth = 3
"#;
        let cfg = GroveConfig::parse(toml).unwrap();
        assert_eq!(cfg.identity.email, "ada@example.com");
        let options = cfg.merge.options();
        assert_eq!(options.strategy, MergeStrategy::Theirs);
        assert!(!options.text_merge);
        assert_eq!(options.binary_sniff_len, 512);
        let policy = cfg.reflog.policy();
        assert_eq!(policy.max_entries, Some(10));
        assert_eq!(policy.max_age_secs, Some(2 * 86_400));
        assert_eq!(cfg.refs.max_symbolic_depth, 3);

        let sig = cfg.identity.signature(42).unwrap();
        assert_eq!(sig.identity(), "Ada <ada@example.com>");
        assert_eq!(sig.tz_offset_minutes, 60);
    }

    #[test]
    fn unknown_key_is_rejected_with_line() {
        let err = GroveConfig::parse("[merge]\nstrategy = \"ours\"\nfancy = 1\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 3"), "{msg}");
        assert!(msg.contains("fancy"), "{msg}");
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(GroveConfig::parse("[merge]\nstrategy = \"octopus\"\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GroveConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, GroveConfig::default());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[nope]\n").unwrap();
        let err = GroveConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: Some(_), .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn bad_identity_fails_signature() {
        let cfg = GroveConfig::parse("[identity]\nname = \"a<b\"\n").unwrap();
        assert!(cfg.identity.signature(0).is_err());
    }
}
