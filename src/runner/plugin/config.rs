//! Engine configuration file parsing.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    /// Source tags that mark a chunk as loaded by the tool.
    pub static ref DEFAULT_RESERVED_SOURCE_TAGS: Vec<&'static str> =
        vec!["=loadstring", "=newlclosure", "@hookvm"];
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete engine configuration.
///
/// Expected format:
/// ```json
/// {
///   "caller_walk_depth": 10,
///   "reserved_source_tags": ["=loadstring", "@mytool"],
///   "max_units": 100000,
///   "echo_output": true
/// }
/// ```
/// Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many frames above the caller `checkcaller` inspects.
    pub caller_walk_depth: usize,
    pub reserved_source_tags: Vec<String>,
    /// Live unit limit. None means unlimited.
    pub max_units: Option<usize>,
    /// Also write `print` output to stdout.
    pub echo_output: bool,
    /// Chunk name given to code compiled by `loadstring` when the caller
    /// does not supply one.
    pub loadstring_chunk_name: String,
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// True when `source` carries one of the reserved tags. `=` tags match
    /// exactly; `@` tags match anywhere in the source name.
    pub fn is_reserved_source(&self, source: &str) -> bool {
        self.reserved_source_tags.iter().any(|tag| {
            if tag.starts_with('@') {
                source.contains(tag.as_str())
            } else {
                source == tag
            }
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            caller_walk_depth: 10,
            reserved_source_tags: DEFAULT_RESERVED_SOURCE_TAGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_units: None,
            echo_output: false,
            loadstring_chunk_name: "=loadstring".to_string(),
        }
    }
}
