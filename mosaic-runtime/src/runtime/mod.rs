//! Runtime coordinator
//!
//! [`Runtime`] owns every module, the extension registry and the factory
//! registry behind a single readers-writer lock. Queries share the lock;
//! discovery, registration, start and stop hold it exclusively for their
//! whole traversal.
//!
//! Module code runs while the exclusive lock is held. A call back into the
//! runtime from that code would deadlock, so the runtime records which
//! thread holds the lock and rejects such calls with
//! [`RuntimeError::Reentrant`].

mod error;
mod lifecycle;

pub use error::RuntimeError;

use crate::config::RuntimeConfig;
use crate::descriptor::Descriptor;
use crate::discovery::{DiscoveryError, DiscoveryReport, ModuleScanner};
use crate::events::{emit, EventSink, NullEventSink, RuntimeEvent, RuntimeEventKind};
use crate::extension::{
    Extension, ExtensionPoint, ExtensionRegistry, Validation, Validator, ValidatorCatalog,
};
use crate::factory::{Executable, ExecutableFactoryRegistry};
use crate::graph;
use crate::loader::{resolve, LibraryError, NativeLibrary};
use crate::module::{Module, ModuleInfo, ModuleState};
use mosaic_api::{FactoryRegistrar, PluginError};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

/// In-process registration hook run each time a module loads
///
/// Plays the role of a native library's register entry point for modules
/// linked into the host.
pub type Activator = Arc<dyn Fn(&mut FactoryRegistrar) -> Result<(), PluginError> + Send + Sync>;

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

// Field order matters: registries holding code from module libraries drop
// before the modules that own the libraries.
#[derive(Default)]
pub(crate) struct RuntimeState {
    factories: ExecutableFactoryRegistry,
    activators: HashMap<String, Activator>,
    extensions: ExtensionRegistry,
    validators: ValidatorCatalog,
    start_sequence: Vec<String>,
    modules: BTreeMap<String, Module>,
}

impl RuntimeState {
    fn module(&self, id: &str) -> Result<&Module, RuntimeError> {
        self.modules
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))
    }

    /// Extensions registered in code may name no module; those count as enabled
    fn is_module_enabled(&self, id: &str) -> bool {
        self.modules
            .get(id)
            .map_or(true, |m| m.descriptor.is_enabled())
    }

    fn register_descriptor(
        &mut self,
        descriptor: Descriptor,
        report: &mut DiscoveryReport,
        events: &dyn EventSink,
    ) {
        let id = descriptor.id().to_string();

        if let Some(existing) = self.modules.get(&id) {
            if existing.descriptor.location() == descriptor.location() {
                tracing::debug!(module = %id, "Module already registered, skipping");
                report.skipped.push(id);
            } else {
                let err = DiscoveryError::DuplicateIdentifier {
                    id: id.clone(),
                    existing: existing.descriptor.location().to_path_buf(),
                    rejected: descriptor.location().to_path_buf(),
                };
                tracing::warn!(module = %id, error = %err, "Module rejected");
                emit(
                    events,
                    RuntimeEvent::new(RuntimeEventKind::ModuleRejected, &id).with_details(err.to_string()),
                );
                report.errors.push(err);
            }
            return;
        }

        for declaration in descriptor.extension_points() {
            let point = ExtensionPoint::new(&declaration.id, &id, declaration.schema.clone());
            if let Err(err) = self.extensions.register_extension_point(point) {
                tracing::warn!(module = %id, error = %err, "Extension point rejected");
                emit(
                    events,
                    RuntimeEvent::new(RuntimeEventKind::ExtensionRejected, &id)
                        .with_details(err.to_string()),
                );
                report.errors.push(err.into());
            }
        }

        for declaration in descriptor.extensions() {
            self.extensions.register_extension(Extension::new(
                declaration.id.clone(),
                &declaration.point,
                &id,
                Arc::clone(&declaration.body),
            ));
        }

        tracing::info!(
            module = %id,
            location = %descriptor.location().display(),
            "Module discovered"
        );
        emit(
            events,
            RuntimeEvent::new(RuntimeEventKind::ModuleDiscovered, &id)
                .with_details(descriptor.location().display().to_string()),
        );
        self.modules.insert(id.clone(), Module::new(descriptor));
        report.added.push(id);
    }

    /// Report requirement cycles that involve newly added modules
    fn report_cycles(&self, report: &mut DiscoveryReport) {
        let cycles = graph::find_cycles(&report.added, |id| {
            self.modules.get(id).map(|m| m.descriptor.as_ref())
        });
        for cycle in cycles {
            if cycle.iter().any(|member| report.added.contains(member)) {
                tracing::warn!(cycle = ?cycle, "Requirement cycle detected");
                report.errors.push(DiscoveryError::RequirementCycle { cycle });
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Hold {
    Read(usize),
    Write,
}

/// The module runtime
pub struct Runtime {
    config: RuntimeConfig,
    scanner: ModuleScanner,
    events: Arc<dyn EventSink>,
    holders: Mutex<HashMap<ThreadId, Hold>>,
    state: RwLock<RuntimeState>,
}

impl Runtime {
    /// Runtime with default configuration and no event sink
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            scanner: ModuleScanner::with_descriptor_file(config.descriptor_file.clone()),
            config,
            events: Arc::new(NullEventSink),
            holders: Mutex::new(HashMap::new()),
            state: RwLock::new(RuntimeState::default()),
        }
    }

    /// Send lifecycle events to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Make `runtime` the process-wide runtime
    ///
    /// Only one runtime can be installed; it lives until the process exits
    /// and must be stopped with [`shutdown`](Self::shutdown).
    pub fn install(runtime: Runtime) -> Result<Arc<Runtime>, RuntimeError> {
        let runtime = Arc::new(runtime);
        GLOBAL
            .set(Arc::clone(&runtime))
            .map_err(|_| RuntimeError::AlreadyInstalled)?;
        tracing::debug!("Global runtime installed");
        Ok(runtime)
    }

    /// The process-wide runtime, if one was installed
    pub fn global() -> Option<Arc<Runtime>> {
        GLOBAL.get().cloned()
    }

    // ------------------------------------------------------------------
    // Discovery and registration
    // ------------------------------------------------------------------

    /// Register every module found below `dir`
    ///
    /// Never loads a library. Modules already registered from the same
    /// location are skipped, so adding a directory twice is harmless.
    /// Broken descriptors, identifier collisions, rejected extension points
    /// and requirement cycles end up in the report.
    pub fn add_module_directory(
        &self,
        dir: impl AsRef<Path>,
    ) -> Result<DiscoveryReport, RuntimeError> {
        let dir = dir.as_ref();
        let mut state = self.write("add_module_directory")?;

        let scan = self.scanner.scan_directory(dir)?;
        tracing::debug!(
            dir = %dir.display(),
            found = scan.total_found(),
            "Scanned module directory"
        );

        let mut report = DiscoveryReport::default();
        for (path, err) in scan.failures {
            tracing::warn!(path = %path.display(), error = %err, "Module descriptor rejected");
            emit(
                self.events.as_ref(),
                RuntimeEvent::new(RuntimeEventKind::ModuleRejected, path.display().to_string())
                    .with_details(err.to_string()),
            );
            report.errors.push(err);
        }
        for descriptor in scan.descriptors {
            state.register_descriptor(descriptor, &mut report, self.events.as_ref());
        }
        state.report_cycles(&mut report);

        Ok(report)
    }

    /// Register a single module from a descriptor built in code
    pub fn add_module(&self, descriptor: Descriptor) -> Result<DiscoveryReport, RuntimeError> {
        let mut state = self.write("add_module")?;
        let mut report = DiscoveryReport::default();
        state.register_descriptor(descriptor, &mut report, self.events.as_ref());
        state.report_cycles(&mut report);
        Ok(report)
    }

    /// Register an extension point outside of any descriptor
    pub fn register_extension_point(
        &self,
        point: ExtensionPoint,
    ) -> Result<Arc<ExtensionPoint>, RuntimeError> {
        let mut state = self.write("register_extension_point")?;
        Ok(state.extensions.register_extension_point(point)?)
    }

    /// Register an extension outside of any descriptor
    pub fn register_extension(&self, extension: Extension) -> Result<Arc<Extension>, RuntimeError> {
        let mut state = self.write("register_extension")?;
        Ok(state.extensions.register_extension(extension))
    }

    /// Run `activator` every time module `module` loads
    pub fn register_activator<F>(&self, module: impl Into<String>, activator: F) -> Result<(), RuntimeError>
    where
        F: Fn(&mut FactoryRegistrar) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        let mut state = self.write("register_activator")?;
        state.activators.insert(module.into(), Arc::new(activator));
        Ok(())
    }

    /// Make a validator available to extension points declaring `schema`
    pub fn register_validator<F, V>(&self, schema: impl Into<String>, factory: F) -> Result<(), RuntimeError>
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Validator + 'static,
    {
        let mut state = self.write("register_validator")?;
        state.validators.register(schema, factory);
        Ok(())
    }

    pub fn set_module_enabled(&self, id: &str, enabled: bool) -> Result<(), RuntimeError> {
        let mut state = self.write("set_module_enabled")?;
        let module = state
            .modules
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;
        module.set_enabled(enabled);
        tracing::debug!(module = %id, enabled, "Module enable flag changed");
        Ok(())
    }

    /// Enable or disable every extension with the given id
    pub fn set_extension_enabled(&self, id: &str, enabled: bool) -> Result<(), RuntimeError> {
        let state = self.write("set_extension_enabled")?;
        let mut found = false;
        for extension in state.extensions.extensions_with_id(id) {
            extension.set_enabled(enabled);
            found = true;
        }
        if !found {
            return Err(RuntimeError::UnknownExtension(id.to_string()));
        }
        tracing::debug!(extension = %id, enabled, "Extension enable flag changed");
        Ok(())
    }

    /// Enable or disable an extension point
    ///
    /// A disabled point reports no valid extensions, whatever their own
    /// flags say.
    pub fn set_extension_point_enabled(&self, id: &str, enabled: bool) -> Result<(), RuntimeError> {
        let state = self.write("set_extension_point_enabled")?;
        let point = state
            .extensions
            .find_extension_point(id)
            .ok_or_else(|| RuntimeError::UnknownExtensionPoint(id.to_string()))?;
        point.set_enabled(enabled);
        tracing::debug!(point = %id, enabled, "Extension point enable flag changed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a module and, first, everything it requires
    ///
    /// Already started modules are left alone. Any dependency or
    /// prerequisite error marks the requested module Failed.
    pub fn start_module(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.write("start_module")?;
        state.start_module(id, self.events.as_ref())
    }

    /// Stop a started module whose dependents are all stopped
    pub fn stop_module(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.write("stop_module")?;
        state.stop_module(id, &self.config, self.events.as_ref())
    }

    /// Stop every started module in reverse start order
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        let mut state = self.write("shutdown")?;
        tracing::info!(started = state.start_sequence.len(), "Shutting down runtime");
        state.shutdown(&self.config, self.events.as_ref());
        Ok(())
    }

    /// Load a module's library without starting the module
    pub fn load_library(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.write("load_library")?;
        state.load_library(id, self.events.as_ref())
    }

    /// Borrow a module's loaded library
    ///
    /// Symbols looked up inside `f` cannot outlive the call.
    pub fn with_library<R>(
        &self,
        id: &str,
        f: impl FnOnce(&NativeLibrary) -> R,
    ) -> Result<R, RuntimeError> {
        let state = self.read("with_library")?;
        let module = state.module(id)?;
        let Some(name) = module.descriptor.library() else {
            return Err(RuntimeError::NoLibrary(id.to_string()));
        };
        match module.library.as_ref().filter(|l| l.is_loaded()) {
            Some(library) => Ok(f(library)),
            None => Err(RuntimeError::Library {
                module: id.to_string(),
                source: LibraryError::NotLoaded(resolve(module.descriptor.location(), name)),
            }),
        }
    }

    /// Construct an executable registered by a loaded module
    ///
    /// The executable keeps the module's native library mapped for as long
    /// as it lives, even across a stop that unloads the library.
    pub fn make_executable(&self, module: &str, key: &str) -> Result<Executable, RuntimeError> {
        let state = self.read("make_executable")?;
        let plugin = state.factories.make_executable(module, key)?;
        let library = state
            .modules
            .get(module)
            .and_then(|m| m.library.as_ref())
            .and_then(NativeLibrary::handle);
        Ok(Executable::new(plugin, library))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn find_module(&self, id: &str) -> Result<Option<ModuleInfo>, RuntimeError> {
        let state = self.read("find_module")?;
        Ok(state.modules.get(id).map(Module::info))
    }

    /// Every registered module, sorted by identifier
    pub fn list_modules(&self) -> Result<Vec<ModuleInfo>, RuntimeError> {
        let state = self.read("list_modules")?;
        Ok(state.modules.values().map(Module::info).collect())
    }

    pub fn module_state(&self, id: &str) -> Result<ModuleState, RuntimeError> {
        let state = self.read("module_state")?;
        Ok(state.module(id)?.state)
    }

    /// Identifiers of started modules, in start order
    pub fn started_modules(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.read("started_modules")?;
        Ok(state.start_sequence.clone())
    }

    pub fn find_extension_point(&self, id: &str) -> Result<Option<Arc<ExtensionPoint>>, RuntimeError> {
        let state = self.read("find_extension_point")?;
        Ok(state.extensions.find_extension_point(id).cloned())
    }

    /// Valid, enabled extensions of enabled modules for `point`
    ///
    /// Validates on first use. An unknown point has no extensions.
    pub fn get_all_extensions_for_point(&self, point: &str) -> Result<Vec<Arc<Extension>>, RuntimeError> {
        let state = self.read("get_all_extensions_for_point")?;
        if state.extensions.find_extension_point(point).is_none() {
            return Ok(Vec::new());
        }
        Ok(state
            .extensions
            .valid_extensions_for(point, &state.validators, |m| state.is_module_enabled(m))?)
    }

    /// Every extension registered for `point`, unvalidated and unfiltered
    pub fn extensions_for_point(&self, point: &str) -> Result<Vec<Arc<Extension>>, RuntimeError> {
        let state = self.read("extensions_for_point")?;
        Ok(state.extensions.extensions_for(point).cloned().collect())
    }

    /// Validate one extension against its point, memoizing the verdict
    pub fn validate_extension(&self, extension: &Extension) -> Result<Validation, RuntimeError> {
        let state = self.read("validate_extension")?;
        Ok(state.extensions.validate(extension, &state.validators)?.clone())
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    fn read(&self, operation: &'static str) -> Result<ReadGuard<'_>, RuntimeError> {
        let me = thread::current().id();
        {
            let mut holders = self.holders.lock();
            match holders.get_mut(&me) {
                Some(Hold::Write) => return Err(RuntimeError::Reentrant { operation }),
                Some(Hold::Read(depth)) => *depth += 1,
                None => {
                    holders.insert(me, Hold::Read(1));
                }
            }
        }
        Ok(ReadGuard {
            guard: self.state.read_recursive(),
            runtime: self,
        })
    }

    fn write(&self, operation: &'static str) -> Result<WriteGuard<'_>, RuntimeError> {
        let me = thread::current().id();
        {
            let mut holders = self.holders.lock();
            if holders.contains_key(&me) {
                tracing::warn!(operation, "Reentrant runtime call rejected");
                return Err(RuntimeError::Reentrant { operation });
            }
            holders.insert(me, Hold::Write);
        }
        Ok(WriteGuard {
            guard: self.state.write(),
            runtime: self,
        })
    }

    fn release(&self) {
        let me = thread::current().id();
        let mut holders = self.holders.lock();
        match holders.get_mut(&me) {
            Some(Hold::Read(depth)) if *depth > 1 => *depth -= 1,
            _ => {
                holders.remove(&me);
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.start_sequence.is_empty() {
            state.shutdown(&self.config, self.events.as_ref());
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct ReadGuard<'a> {
    guard: RwLockReadGuard<'a, RuntimeState>,
    runtime: &'a Runtime,
}

impl Deref for ReadGuard<'_> {
    type Target = RuntimeState;

    fn deref(&self) -> &RuntimeState {
        &self.guard
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.runtime.release();
    }
}

struct WriteGuard<'a> {
    guard: RwLockWriteGuard<'a, RuntimeState>,
    runtime: &'a Runtime,
}

impl Deref for WriteGuard<'_> {
    type Target = RuntimeState;

    fn deref(&self) -> &RuntimeState {
        &self.guard
    }
}

impl DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut RuntimeState {
        &mut self.guard
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.runtime.release();
    }
}
