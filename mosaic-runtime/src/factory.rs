//! Executable factory registry
//!
//! Per-module table of named constructors. Modules fill it while they
//! load; the runtime asks it for the plugin executable. The registry never
//! constructs anything on its own.

use crate::loader::LibraryHandle;
use mosaic_api::{ExecutableFactory, Plugin, PluginError};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when creating an executable
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("No factory '{key}' registered by module '{module}'")]
    NotFound { module: String, key: String },

    #[error("Factory '{key}' of module '{module}' failed: {source}")]
    Construction {
        module: String,
        key: String,
        #[source]
        source: PluginError,
    },
}

/// Run module code, turning a panic into an error
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, PluginError>) -> Result<T, PluginError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Plugin paired with the library its code lives in
///
/// Field order matters: the plugin is dropped before the handle, so a
/// library unloaded while the executable is alive closes only afterwards.
pub struct Executable {
    plugin: Box<dyn Plugin>,
    library: Option<LibraryHandle>,
}

impl Executable {
    pub fn new(plugin: Box<dyn Plugin>, library: Option<LibraryHandle>) -> Self {
        Self { plugin, library }
    }

    /// Whether the executable keeps a native library mapped
    pub fn pins_library(&self) -> bool {
        self.library.is_some()
    }
}

impl Plugin for Executable {
    fn start(&mut self) -> Result<(), PluginError> {
        self.plugin.start()
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        self.plugin.stop()
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

/// Registry of executable factories, keyed by module then factory key
#[derive(Default)]
pub struct ExecutableFactoryRegistry {
    modules: HashMap<String, BTreeMap<String, Arc<dyn ExecutableFactory>>>,
}

impl ExecutableFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the factories a module registered during its load
    ///
    /// Replaces whatever the module registered during a previous load.
    pub fn replace_module(
        &mut self,
        module: &str,
        factories: impl IntoIterator<Item = (String, Arc<dyn ExecutableFactory>)>,
    ) {
        let table: BTreeMap<_, _> = factories.into_iter().collect();
        tracing::debug!(module = %module, count = table.len(), "Executable factories registered");
        if self.modules.insert(module.to_string(), table).is_some() {
            tracing::debug!(module = %module, "Previous factories replaced");
        }
    }

    /// Drop every factory of a module
    ///
    /// Must happen before the module's library is unloaded, since the
    /// factories may live in it.
    pub fn remove_module(&mut self, module: &str) -> bool {
        self.modules.remove(module).is_some()
    }

    pub fn contains(&self, module: &str, key: &str) -> bool {
        self.modules
            .get(module)
            .map(|table| table.contains_key(key))
            .unwrap_or(false)
    }

    /// Factory keys registered by a module, sorted
    pub fn keys(&self, module: &str) -> Vec<String> {
        self.modules
            .get(module)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Construct a new executable
    ///
    /// A panicking factory is reported as a construction error.
    pub fn make_executable(&self, module: &str, key: &str) -> Result<Box<dyn Plugin>, FactoryError> {
        let factory = self
            .modules
            .get(module)
            .and_then(|table| table.get(key))
            .ok_or_else(|| FactoryError::NotFound {
                module: module.to_string(),
                key: key.to_string(),
            })?;

        guarded(|| factory.create()).map_err(|source| FactoryError::Construction {
            module: module.to_string(),
            key: key.to_string(),
            source,
        })
    }
}

impl fmt::Debug for ExecutableFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (module, table) in &self.modules {
            map.entry(module, &table.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
