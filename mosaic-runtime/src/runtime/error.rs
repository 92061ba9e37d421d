use crate::discovery::DiscoveryError;
use crate::extension::RegistryError;
use crate::factory::FactoryError;
use crate::graph::DependencyError;
use crate::loader::LibraryError;
use crate::module::ModuleState;
use mosaic_api::PluginError;
use thiserror::Error;

/// Errors returned by [`Runtime`](super::Runtime) operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Module '{0}' is not registered")]
    UnknownModule(String),

    #[error("Extension '{0}' is not registered")]
    UnknownExtension(String),

    #[error("Extension point '{0}' is not registered")]
    UnknownExtensionPoint(String),

    #[error("Runtime called from inside one of its own {operation} critical sections")]
    Reentrant { operation: &'static str },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Cannot start module '{module}': {source}")]
    Dependency {
        module: String,
        #[source]
        source: DependencyError,
    },

    #[error("Cannot start module '{module}': prerequisite '{prerequisite}' failed: {reason}")]
    PrerequisiteFailed {
        module: String,
        prerequisite: String,
        reason: String,
    },

    #[error("Module '{module}' failed earlier: {reason}")]
    AlreadyFailed { module: String, reason: String },

    #[error("Library of module '{module}': {source}")]
    Library {
        module: String,
        #[source]
        source: LibraryError,
    },

    #[error("Module '{0}' declares no library")]
    NoLibrary(String),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error("Plugin of module '{module}' failed: {source}")]
    Plugin {
        module: String,
        #[source]
        source: PluginError,
    },

    #[error("Module '{module}' is not started (state: {state})")]
    NotStarted { module: String, state: ModuleState },

    #[error("Module '{module}' is required by running modules: {}", .dependents.join(", "))]
    DependentsRunning {
        module: String,
        dependents: Vec<String>,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("A global runtime is already installed")]
    AlreadyInstalled,
}
