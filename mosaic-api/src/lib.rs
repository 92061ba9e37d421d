//! mosaic-api: Shared types for the mosaic module runtime
//!
//! This crate defines the contract between the runtime and module code.
//! A module contributes executables (usually one plugin object) through
//! named factories; the runtime only ever sees them as [`Plugin`] trait
//! objects that can be started and stopped.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// ABI version for compatibility checking between host and native modules
pub const API_VERSION: u32 = 1;

/// Symbol a native module exports to report the ABI it was built against
pub const MODULE_ABI_SYMBOL: &str = "mosaic_module_abi_version";

/// Symbol a native module exports to register its executable factories
pub const MODULE_REGISTER_SYMBOL: &str = "mosaic_module_register";

/// Signature of [`MODULE_ABI_SYMBOL`]
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of [`MODULE_REGISTER_SYMBOL`]
pub type RegisterFn = unsafe extern "C" fn(registrar: *mut FactoryRegistrar);

/// Error raised by module code across the plugin boundary
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("plugin panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PluginError {
    /// Create a plain failure with a message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Lifecycle contract of the executable a module produces
///
/// `start` may fail and the failure is reported to whoever started the
/// module. `stop` is best effort: the runtime logs its errors and keeps
/// shutting down.
pub trait Plugin: Send + Sync {
    /// Called once the module and all its requirements are loaded
    fn start(&mut self) -> Result<(), PluginError>;

    /// Called when the module is stopped
    fn stop(&mut self) -> Result<(), PluginError>;
}

/// Plugin used for modules that declare no plugin class
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPlugin;

impl Plugin for EmptyPlugin {
    fn start(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Named constructor for an executable
///
/// Implemented for any `Fn() -> Result<Box<dyn Plugin>, PluginError>`, so
/// closures can be registered directly.
pub trait ExecutableFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Plugin>, PluginError>;
}

impl<F> ExecutableFactory for F
where
    F: Fn() -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Plugin>, PluginError> {
        self()
    }
}

/// Collects the factories a module registers while it is loading
pub struct FactoryRegistrar {
    module: String,
    factories: Vec<(String, Arc<dyn ExecutableFactory>)>,
}

impl FactoryRegistrar {
    /// Create an empty registrar for the given module
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            factories: Vec::new(),
        }
    }

    /// Identifier of the module being loaded
    pub fn module_id(&self) -> &str {
        &self.module
    }

    /// Register a factory under a key, replacing any earlier one with the same key
    pub fn register(&mut self, key: impl Into<String>, factory: impl ExecutableFactory + 'static) {
        let key = key.into();
        self.factories.retain(|(existing, _)| *existing != key);
        self.factories.push((key, Arc::new(factory)));
    }

    /// Register a plugin type constructed through `Default`
    pub fn register_default<P>(&mut self, key: impl Into<String>)
    where
        P: Plugin + Default + 'static,
    {
        self.register(key, || Ok(Box::new(P::default()) as Box<dyn Plugin>));
    }

    /// Registered factory keys, in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(key, _)| key.as_str())
    }

    /// Number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Consume the registrar, yielding the registered factories
    pub fn into_factories(self) -> Vec<(String, Arc<dyn ExecutableFactory>)> {
        self.factories
    }
}

impl fmt::Debug for FactoryRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistrar")
            .field("module", &self.module)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
