//! Module records and lifecycle states

use crate::descriptor::Descriptor;
use crate::factory::Executable;
use crate::loader::NativeLibrary;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Registered, never started
    Discovered,
    /// Library loading and plugin construction in progress
    Loading,
    Started,
    Stopping,
    /// Stopped after a successful start; may start again
    Stopped,
    /// Permanent
    Failed,
}

impl ModuleState {
    /// Whether `start_module` may (re)start a module in this state
    pub fn can_start(self) -> bool {
        matches!(self, ModuleState::Discovered | ModuleState::Stopped)
    }

    /// Started or on its way there
    pub fn is_active(self) -> bool {
        matches!(self, ModuleState::Started | ModuleState::Loading)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Loading => "loading",
            ModuleState::Started => "started",
            ModuleState::Stopping => "stopping",
            ModuleState::Stopped => "stopped",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A registered module
///
/// Field order matters: the plugin is dropped before the library whose code
/// it may run.
pub(crate) struct Module {
    pub(crate) plugin: Option<Executable>,
    pub(crate) library: Option<NativeLibrary>,
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) state: ModuleState,
    pub(crate) failure: Option<String>,
}

impl Module {
    pub(crate) fn new(descriptor: Descriptor) -> Self {
        Self {
            plugin: None,
            library: None,
            descriptor: Arc::new(descriptor),
            state: ModuleState::Discovered,
            failure: None,
        }
    }

    pub(crate) fn id(&self) -> &str {
        self.descriptor.id()
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        if self.descriptor.is_enabled() != enabled {
            Arc::make_mut(&mut self.descriptor).set_enabled(enabled);
        }
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.plugin = None;
        self.state = ModuleState::Failed;
        self.failure = Some(reason.into());
    }

    /// Library of the module, created on first need
    pub(crate) fn library_mut(&mut self) -> Option<&mut NativeLibrary> {
        let name = self.descriptor.library()?;
        if self.library.is_none() {
            self.library = Some(NativeLibrary::for_module(self.descriptor.location(), name));
        }
        self.library.as_mut()
    }

    pub(crate) fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.descriptor.id().to_string(),
            version: self.descriptor.version().map(|v| v.to_string()),
            location: self.descriptor.location().to_path_buf(),
            requires: self
                .descriptor
                .requirements()
                .iter()
                .map(|r| r.id.clone())
                .collect(),
            enabled: self.descriptor.is_enabled(),
            state: self.state,
            failure: self.failure.clone(),
            library_loaded: self.library.as_ref().is_some_and(|l| l.is_loaded()),
            descriptor: Arc::clone(&self.descriptor),
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("state", &self.state)
            .field("library", &self.library)
            .field("plugin", &self.plugin.is_some())
            .finish()
    }
}

/// Snapshot of a module, detached from the runtime lock
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub location: PathBuf,
    pub requires: Vec<String>,
    pub enabled: bool,
    pub state: ModuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub library_loaded: bool,
    #[serde(skip)]
    pub descriptor: Arc<Descriptor>,
}
