//! Runtime configuration and launch profiles

use crate::descriptor::DESCRIPTOR_FILE;
use crate::discovery::{DiscoveryError, DiscoveryReport};
use crate::runtime::{Runtime, RuntimeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading a profile
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read profile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings fixed at runtime construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Descriptor file name looked up in each module directory
    pub descriptor_file: String,

    /// Unload a module's native library when the module stops
    pub unload_libraries_on_stop: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            descriptor_file: DESCRIPTOR_FILE.to_string(),
            unload_libraries_on_stop: false,
        }
    }
}

/// Launch profile, usually read from a JSON file
///
/// ```json
/// {
///   "module_dirs": ["modules", "/opt/app/modules"],
///   "start": ["app.main"],
///   "disabled": ["io.legacy"],
///   "unload_libraries_on_stop": true
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub module_dirs: Vec<PathBuf>,
    /// Modules to start, in order
    pub start: Vec<String>,
    /// Modules to disable after discovery
    pub disabled: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unload_libraries_on_stop: Option<bool>,
}

impl Profile {
    /// Read a profile from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Runtime settings implied by this profile
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        if let Some(unload) = self.unload_libraries_on_stop {
            config.unload_libraries_on_stop = unload;
        }
        config
    }

    /// Add the profile's directories to `runtime` and disable its listed modules
    ///
    /// Missing directories and unknown disabled modules are reported, not
    /// fatal.
    pub fn apply(&self, runtime: &Runtime) -> Result<DiscoveryReport, RuntimeError> {
        let mut report = DiscoveryReport::default();

        for dir in &self.module_dirs {
            match runtime.add_module_directory(dir) {
                Ok(found) => report.absorb(found),
                Err(RuntimeError::Discovery(e @ DiscoveryError::DirectoryNotFound(_))) => {
                    tracing::warn!(dir = %dir.display(), "Module directory not found");
                    report.errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        for id in &self.disabled {
            match runtime.set_module_enabled(id, false) {
                Ok(()) => tracing::info!(module = %id, "Module disabled by profile"),
                Err(RuntimeError::UnknownModule(_)) => {
                    tracing::warn!(module = %id, "Profile disables an unknown module")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Start every module listed in `start`
    ///
    /// Each module is attempted even when an earlier one fails; the failures
    /// are returned.
    pub fn start(&self, runtime: &Runtime) -> Vec<(String, RuntimeError)> {
        let mut failures = Vec::new();
        for id in &self.start {
            if let Err(e) = runtime.start_module(id) {
                tracing::error!(module = %id, error = %e, "Failed to start module");
                failures.push((id.clone(), e));
            }
        }
        failures
    }
}
