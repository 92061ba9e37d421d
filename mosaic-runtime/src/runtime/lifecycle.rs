//! Module start and stop
//!
//! Everything here runs with the runtime's exclusive lock held.

use super::{RuntimeError, RuntimeState};
use crate::config::RuntimeConfig;
use crate::events::{emit, EventSink, RuntimeEvent, RuntimeEventKind};
use crate::factory::{guarded, Executable};
use crate::graph::{self, DependencyError};
use crate::loader::{LibraryError, NativeLibrary};
use crate::module::ModuleState;
use mosaic_api::{
    AbiVersionFn, EmptyPlugin, FactoryRegistrar, Plugin, RegisterFn, API_VERSION,
    MODULE_ABI_SYMBOL, MODULE_REGISTER_SYMBOL,
};

/// Let a native library register its factories, if it exports the entry point
///
/// Libraries without the register symbol are plain shared objects and
/// contribute nothing.
fn register_native(
    library: &NativeLibrary,
    registrar: &mut FactoryRegistrar,
) -> Result<bool, LibraryError> {
    if !library.has_symbol(MODULE_REGISTER_SYMBOL) {
        return Ok(false);
    }

    // SAFETY: both symbols are generated by `mosaic_sdk::export_module!` with
    // exactly these signatures, and the ABI version is checked before the
    // registrar pointer crosses the boundary.
    unsafe {
        let abi_version = library.symbol::<AbiVersionFn>(MODULE_ABI_SYMBOL)?;
        let actual = abi_version();
        if actual != API_VERSION {
            return Err(LibraryError::ApiVersionMismatch {
                path: library.path().to_path_buf(),
                expected: API_VERSION,
                actual,
            });
        }

        let register = library.symbol::<RegisterFn>(MODULE_REGISTER_SYMBOL)?;
        register(registrar as *mut FactoryRegistrar);
    }
    Ok(true)
}

impl RuntimeState {
    pub(crate) fn start_module(&mut self, id: &str, events: &dyn EventSink) -> Result<(), RuntimeError> {
        let module = self
            .modules
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;

        match module.state {
            ModuleState::Started => return Ok(()),
            ModuleState::Failed => {
                return Err(RuntimeError::AlreadyFailed {
                    module: id.to_string(),
                    reason: module.failure.clone().unwrap_or_default(),
                })
            }
            _ => {}
        }

        let order = graph::resolve_start_order(id, |m| {
            self.modules.get(m).map(|module| module.descriptor.as_ref())
        });
        let order = match order {
            Ok(order) => order,
            Err(source) => {
                let own_switch =
                    matches!(&source, DependencyError::Disabled { module, .. } if module == id);
                let err = RuntimeError::Dependency {
                    module: id.to_string(),
                    source,
                };
                // Disabling is reversible, so a disabled root is refused, not failed
                if !own_switch {
                    self.fail(id, &err, events);
                }
                return Err(err);
            }
        };

        tracing::debug!(module = %id, order = ?order, "Resolved start order");

        for member in order.iter().filter(|m| m.as_str() != id) {
            let Some(prerequisite) = self.modules.get(member) else {
                continue;
            };
            let reason = match prerequisite.state {
                ModuleState::Started => continue,
                ModuleState::Failed => prerequisite.failure.clone().unwrap_or_default(),
                state if state.can_start() => match self.activate(member, events) {
                    Ok(()) => continue,
                    Err(e) => e.to_string(),
                },
                state => format!("module is {state}"),
            };

            let err = RuntimeError::PrerequisiteFailed {
                module: id.to_string(),
                prerequisite: member.clone(),
                reason,
            };
            self.fail(id, &err, events);
            return Err(err);
        }

        self.activate(id, events)
    }

    /// Load and start one module whose requirements are all started
    fn activate(&mut self, id: &str, events: &dyn EventSink) -> Result<(), RuntimeError> {
        let result = self.try_activate(id, events);
        if let Err(e) = &result {
            self.factories.remove_module(id);
            self.fail(id, e, events);
        }
        result
    }

    fn try_activate(&mut self, id: &str, events: &dyn EventSink) -> Result<(), RuntimeError> {
        let RuntimeState {
            modules,
            factories,
            activators,
            start_sequence,
            ..
        } = self;

        let module = modules
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;

        module.state = ModuleState::Loading;
        tracing::info!(module = %id, "Loading module");
        emit(events, RuntimeEvent::new(RuntimeEventKind::ModuleLoading, id));

        let mut registrar = FactoryRegistrar::new(id);

        if let Some(library) = module.library_mut() {
            let library_error = |source| RuntimeError::Library {
                module: id.to_string(),
                source,
            };
            if !library.is_loaded() {
                library.load().map_err(library_error)?;
                tracing::info!(module = %id, path = %library.path().display(), "Library loaded");
                emit(
                    events,
                    RuntimeEvent::new(RuntimeEventKind::LibraryLoaded, id)
                        .with_details(library.path().display().to_string()),
                );
            }
            if register_native(library, &mut registrar).map_err(library_error)? {
                tracing::debug!(module = %id, "Native factories registered");
            }
        }

        if let Some(activator) = activators.get(id) {
            guarded(|| activator(&mut registrar)).map_err(|source| RuntimeError::Plugin {
                module: id.to_string(),
                source,
            })?;
        }

        factories.replace_module(id, registrar.into_factories());

        let plugin: Box<dyn Plugin> = match module.descriptor.class() {
            None => Box::new(EmptyPlugin),
            Some(class) => factories.make_executable(id, class)?,
        };
        let library = module.library.as_ref().and_then(NativeLibrary::handle);
        let mut plugin = Executable::new(plugin, library);

        guarded(|| plugin.start()).map_err(|source| RuntimeError::Plugin {
            module: id.to_string(),
            source,
        })?;

        module.plugin = Some(plugin);
        module.state = ModuleState::Started;
        module.failure = None;
        start_sequence.push(id.to_string());

        tracing::info!(module = %id, "Module started");
        emit(events, RuntimeEvent::new(RuntimeEventKind::ModuleStarted, id));
        Ok(())
    }

    fn fail(&mut self, id: &str, err: &RuntimeError, events: &dyn EventSink) {
        if let Some(module) = self.modules.get_mut(id) {
            let reason = err.to_string();
            tracing::error!(module = %id, error = %reason, "Module failed");
            emit(
                events,
                RuntimeEvent::new(RuntimeEventKind::ModuleFailed, id).with_details(reason.clone()),
            );
            module.fail(reason);
        }
    }

    pub(crate) fn stop_module(
        &mut self,
        id: &str,
        config: &RuntimeConfig,
        events: &dyn EventSink,
    ) -> Result<(), RuntimeError> {
        let module = self
            .modules
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;

        if module.state != ModuleState::Started {
            return Err(RuntimeError::NotStarted {
                module: id.to_string(),
                state: module.state,
            });
        }

        let dependents: Vec<String> = self
            .modules
            .values()
            .filter(|m| m.state.is_active() && m.descriptor.requires(id))
            .map(|m| m.id().to_string())
            .collect();
        if !dependents.is_empty() {
            return Err(RuntimeError::DependentsRunning {
                module: id.to_string(),
                dependents,
            });
        }

        self.deactivate(id, config, events);
        Ok(())
    }

    /// Stop a started module; hook failures are logged, never returned
    fn deactivate(&mut self, id: &str, config: &RuntimeConfig, events: &dyn EventSink) {
        let RuntimeState {
            modules,
            factories,
            start_sequence,
            ..
        } = self;
        let Some(module) = modules.get_mut(id) else {
            return;
        };

        module.state = ModuleState::Stopping;
        tracing::info!(module = %id, "Stopping module");
        emit(events, RuntimeEvent::new(RuntimeEventKind::ModuleStopping, id));

        if let Some(mut plugin) = module.plugin.take() {
            if let Err(e) = guarded(|| plugin.stop()) {
                tracing::warn!(module = %id, error = %e, "Plugin stop hook failed");
                emit(
                    events,
                    RuntimeEvent::new(RuntimeEventKind::StopHookFailed, id).with_details(e.to_string()),
                );
            }
        }

        // Factories may point into the library
        factories.remove_module(id);

        if config.unload_libraries_on_stop {
            if let Some(library) = module.library.as_mut().filter(|l| l.is_loaded()) {
                match library.unload() {
                    Ok(()) => emit(events, RuntimeEvent::new(RuntimeEventKind::LibraryUnloaded, id)),
                    Err(e) => tracing::warn!(module = %id, error = %e, "Failed to unload library"),
                }
            }
        }

        module.state = ModuleState::Stopped;
        start_sequence.retain(|s| s != id);
        tracing::info!(module = %id, "Module stopped");
        emit(events, RuntimeEvent::new(RuntimeEventKind::ModuleStopped, id));
    }

    /// Stop every started module, last started first
    pub(crate) fn shutdown(&mut self, config: &RuntimeConfig, events: &dyn EventSink) {
        let order: Vec<String> = self.start_sequence.iter().rev().cloned().collect();
        for id in order {
            let started = self
                .modules
                .get(&id)
                .is_some_and(|m| m.state == ModuleState::Started);
            if started {
                self.deactivate(&id, config, events);
            }
        }
        if let Err(e) = events.flush() {
            tracing::warn!(error = %e, "Failed to flush runtime events");
        }
    }

    pub(crate) fn load_library(&mut self, id: &str, events: &dyn EventSink) -> Result<(), RuntimeError> {
        let module = self
            .modules
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule(id.to_string()))?;
        let library = module
            .library_mut()
            .ok_or_else(|| RuntimeError::NoLibrary(id.to_string()))?;

        if library.is_loaded() {
            return Ok(());
        }
        library.load().map_err(|source| RuntimeError::Library {
            module: id.to_string(),
            source,
        })?;
        tracing::info!(module = %id, path = %library.path().display(), "Library loaded");
        emit(
            events,
            RuntimeEvent::new(RuntimeEventKind::LibraryLoaded, id)
                .with_details(library.path().display().to_string()),
        );
        Ok(())
    }
}
