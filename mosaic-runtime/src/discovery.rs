//! Module discovery and directory scanning
//!
//! A module is a directory holding a descriptor file. Scanning a directory
//! reads the descriptor of every immediate subdirectory; broken descriptors
//! are collected as failures and never abort the scan.

use crate::descriptor::{read_descriptor, Descriptor, DescriptorError, DESCRIPTOR_FILE};
use crate::extension::RegistryError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during module discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },

    #[error("Module '{id}' at {rejected} already registered from {existing}")]
    DuplicateIdentifier {
        id: String,
        existing: PathBuf,
        rejected: PathBuf,
    },

    #[error("Requirement cycle: {}", .cycle.join(" -> "))]
    RequirementCycle { cycle: Vec<String> },

    #[error(transparent)]
    Extension(#[from] RegistryError),
}

/// Descriptors found in one directory
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Valid descriptors, sorted by directory name
    pub descriptors: Vec<Descriptor>,

    /// Module directories whose descriptor was rejected
    pub failures: Vec<(PathBuf, DiscoveryError)>,
}

impl ScanResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of module directories found
    pub fn total_found(&self) -> usize {
        self.descriptors.len() + self.failures.len()
    }
}

/// Outcome of adding a module directory to a runtime
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Identifiers of newly registered modules
    pub added: Vec<String>,

    /// Identifiers already registered from the same location
    pub skipped: Vec<String>,

    pub errors: Vec<DiscoveryError>,
}

impl DiscoveryReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: DiscoveryReport) {
        self.added.extend(other.added);
        self.skipped.extend(other.skipped);
        self.errors.extend(other.errors);
    }
}

/// Module directory scanner
#[derive(Debug, Clone)]
pub struct ModuleScanner {
    descriptor_file: String,
}

impl Default for ModuleScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleScanner {
    /// Scanner looking for `plugin.xml`
    pub fn new() -> Self {
        Self::with_descriptor_file(DESCRIPTOR_FILE)
    }

    pub fn with_descriptor_file(name: impl Into<String>) -> Self {
        Self {
            descriptor_file: name.into(),
        }
    }

    pub fn descriptor_file(&self) -> &str {
        &self.descriptor_file
    }

    /// Read the descriptor of every subdirectory of `dir`
    ///
    /// Subdirectories without a descriptor file are ignored.
    pub fn scan_directory(&self, dir: impl AsRef<Path>) -> Result<ScanResult, DiscoveryError> {
        let dir = dir.as_ref();

        if !dir.is_dir() {
            return Err(DiscoveryError::DirectoryNotFound(dir.to_path_buf()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::ReadDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut result = ScanResult::default();
        let mut module_dirs = Vec::new();

        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_dir() && path.join(&self.descriptor_file).is_file() {
                        module_dirs.push(path);
                    }
                }
                Err(source) => result.failures.push((
                    dir.to_path_buf(),
                    DiscoveryError::ReadDirectory {
                        path: dir.to_path_buf(),
                        source,
                    },
                )),
            }
        }

        module_dirs.sort();
        for module_dir in module_dirs {
            match self.read_module(&module_dir) {
                Ok(descriptor) => result.descriptors.push(descriptor),
                Err(e) => result.failures.push((module_dir, e)),
            }
        }

        Ok(result)
    }

    /// Read the descriptor of a single module directory
    pub fn read_module(&self, module_dir: impl AsRef<Path>) -> Result<Descriptor, DiscoveryError> {
        let module_dir = absolute(module_dir.as_ref());
        let path = module_dir.join(&self.descriptor_file);
        read_descriptor(&path).map_err(|source| DiscoveryError::Descriptor { path, source })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Default module directories for an application
pub fn default_module_dirs(app_name: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(data_dir) = dirs::data_local_dir() {
        dirs.push(data_dir.join(app_name).join("modules"));
    }

    dirs.push(PathBuf::from("modules"));

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_module(root: &Path, dir: &str, xml: &str) {
        let module = root.join(dir);
        fs::create_dir_all(&module).unwrap();
        fs::write(module.join(DESCRIPTOR_FILE), xml).unwrap();
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp = TempDir::new().unwrap();
        let result = ModuleScanner::new().scan_directory(temp.path()).unwrap();

        assert!(result.descriptors.is_empty());
        assert!(result.is_success());
    }

    #[test]
    fn test_scan_nonexistent_directory() {
        let result = ModuleScanner::new().scan_directory("/nonexistent/path/to/modules");
        assert!(matches!(result, Err(DiscoveryError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_scan_collects_valid_and_broken() {
        let temp = TempDir::new().unwrap();
        write_module(temp.path(), "b-io", r#"<plugin id="io"><requirement id="core"/></plugin>"#);
        write_module(temp.path(), "a-core", r#"<plugin id="core" version="1.0"/>"#);
        write_module(temp.path(), "c-broken", r#"<plugin version="1.0"/>"#);
        fs::create_dir_all(temp.path().join("d-no-descriptor")).unwrap();
        fs::write(temp.path().join("readme.txt"), "modules").unwrap();

        let result = ModuleScanner::new().scan_directory(temp.path()).unwrap();
        let ids: Vec<_> = result.descriptors.iter().map(|d| d.id()).collect();

        assert_eq!(ids, vec!["core", "io"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.total_found(), 3);
        assert!(matches!(
            result.failures[0].1,
            DiscoveryError::Descriptor { .. }
        ));
        assert!(result.descriptors[0].location().is_absolute());
    }

    #[test]
    fn test_custom_descriptor_file() {
        let temp = TempDir::new().unwrap();
        let module = temp.path().join("core");
        fs::create_dir_all(&module).unwrap();
        fs::write(module.join("module.xml"), r#"<plugin id="core"/>"#).unwrap();

        assert_eq!(
            ModuleScanner::new()
                .scan_directory(temp.path())
                .unwrap()
                .total_found(),
            0
        );
        let scanner = ModuleScanner::with_descriptor_file("module.xml");
        assert_eq!(scanner.scan_directory(temp.path()).unwrap().descriptors.len(), 1);
    }

    #[test]
    fn test_default_module_dirs() {
        let dirs = default_module_dirs("myapp");
        assert!(!dirs.is_empty());
        assert!(dirs.iter().any(|d| d.ends_with("modules")));
    }
}
