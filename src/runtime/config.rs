use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stack machine limits. Every field is optional in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Memory size in bytes when the machine is created.
    pub initial_memory: usize,
    /// Upper bound for `GROW`.
    pub max_memory: usize,
    pub max_call_depth: usize,
    pub max_stack_size: usize,
    /// Instruction budget for one run. `None` means unbounded.
    pub max_steps: Option<usize>,
    /// Run the static stack/structure check when a module is loaded.
    pub verify: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            initial_memory: 4096,
            max_memory: 16 * 1024 * 1024,
            max_call_depth: 1_000_000,
            max_stack_size: 1_000_000,
            max_steps: None,
            verify: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl VmConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
