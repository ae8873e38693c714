//! Reader and inspection configuration.
//!
//! [`ReaderConfig`] tunes how a store is read and is passed in by the
//! caller. [`InspectConfig`] is loaded by the `pst-inspect` binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `PST_INSPECT_FILE`: Path of the file to inspect (required)
//! - `PST_INSPECT_VERIFY_CHECKSUMS`: `true` or `false` (default: `true`)
//! - `PST_INSPECT_MAX_TREE_DEPTH`: Sub-node tree depth cap (default: `8`)
//!
//! # Invariants
//!
//! - `max_tree_depth` is always at least 1

use std::path::PathBuf;

/// Options for reading a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Check page and block CRCs. Header CRCs are always checked.
    pub verify_checksums: bool,
    /// Cache decoded property contexts, tables and sub-node maps per NID.
    pub memoize: bool,
    /// Deepest sub-node tree accepted before reporting corruption.
    pub max_tree_depth: u8,
}

impl ReaderConfig {
    /// Default sub-node tree depth cap.
    pub const DEFAULT_MAX_TREE_DEPTH: u8 = 8;
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            memoize: true,
            max_tree_depth: Self::DEFAULT_MAX_TREE_DEPTH,
        }
    }
}

/// Configuration of the `pst-inspect` binary.
#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub file: PathBuf,
    pub reader: ReaderConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

const FILE_VAR: &str = "PST_INSPECT_FILE";
const VERIFY_VAR: &str = "PST_INSPECT_VERIFY_CHECKSUMS";
const DEPTH_VAR: &str = "PST_INSPECT_MAX_TREE_DEPTH";

impl InspectConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `PST_INSPECT_FILE` is not set or is empty
    /// - `PST_INSPECT_VERIFY_CHECKSUMS` is set but not `true`/`false`
    /// - `PST_INSPECT_MAX_TREE_DEPTH` is set but not in 1..=255
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = lookup(FILE_VAR).ok_or_else(|| ConfigError::MissingEnvVar(FILE_VAR.to_string()))?;
        if file.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: FILE_VAR.to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let verify_checksums = match lookup(VERIFY_VAR) {
            Some(value) => value.parse::<bool>().map_err(|_| ConfigError::InvalidValue {
                name: VERIFY_VAR.to_string(),
                message: format!("'{value}' is not a boolean (use true or false)"),
            })?,
            None => true,
        };

        let max_tree_depth = match lookup(DEPTH_VAR) {
            Some(value) => match value.parse::<u8>() {
                Ok(depth) if depth > 0 => depth,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: DEPTH_VAR.to_string(),
                        message: format!("'{value}' is not a depth between 1 and 255"),
                    });
                }
            },
            None => ReaderConfig::DEFAULT_MAX_TREE_DEPTH,
        };

        Ok(Self {
            file: PathBuf::from(file),
            reader: ReaderConfig {
                verify_checksums,
                max_tree_depth,
                ..ReaderConfig::default()
            },
        })
    }
}
