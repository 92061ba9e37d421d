//! Shared fixtures for the runtime integration tests

#![allow(dead_code)]

use mosaic_runtime::{Descriptor, FactoryRegistrar, Plugin, PluginError, Runtime};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ordered record of plugin lifecycle calls, e.g. `start:a`
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

/// How a recording plugin misbehaves
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub enum Behavior {
    #[default]
    Normal,
    FailStart,
    PanicStart,
    PanicCreate,
    FailStop,
}

pub struct RecordingPlugin {
    name: String,
    journal: Journal,
    behavior: Behavior,
}

impl Plugin for RecordingPlugin {
    fn start(&mut self) -> Result<(), PluginError> {
        match self.behavior {
            Behavior::FailStart => Err(PluginError::msg(format!("{} refused to start", self.name))),
            Behavior::PanicStart => panic!("{} exploded", self.name),
            _ => {
                self.journal.push(format!("start:{}", self.name));
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        self.journal.push(format!("stop:{}", self.name));
        if self.behavior == Behavior::FailStop {
            return Err(PluginError::msg("device busy"));
        }
        Ok(())
    }
}

/// Plugin class key used by [`module`]
pub fn class_of(id: &str) -> String {
    format!("{id}.Plugin")
}

/// Descriptor with a plugin class and the given requirements
pub fn module(id: &str, requires: &[&str]) -> Descriptor {
    let mut builder = Descriptor::builder(id)
        .class(class_of(id))
        .location(format!("/virtual/{id}"));
    for requirement in requires {
        builder = builder.requires(*requirement);
    }
    builder.build().unwrap()
}

/// Register an activator producing a [`RecordingPlugin`] for `id`
pub fn record(runtime: &Runtime, id: &str, journal: &Journal) {
    record_with(runtime, id, journal, Behavior::Normal);
}

pub fn record_with(runtime: &Runtime, id: &str, journal: &Journal, behavior: Behavior) {
    let journal = journal.clone();
    let name = id.to_string();
    runtime
        .register_activator(id, move |registrar: &mut FactoryRegistrar| {
            let journal = journal.clone();
            let name = name.clone();
            registrar.register(
                class_of(&name),
                move || -> Result<Box<dyn Plugin>, PluginError> {
                    if behavior == Behavior::PanicCreate {
                        panic!("{name} could not be built");
                    }
                    journal.push(format!("create:{name}"));
                    Ok(Box::new(RecordingPlugin {
                        name: name.clone(),
                        journal: journal.clone(),
                        behavior,
                    }))
                },
            );
            Ok(())
        })
        .unwrap();
}

/// Runtime holding `descriptors`, each with a recording plugin
pub fn runtime_with(descriptors: Vec<Descriptor>, journal: &Journal) -> Runtime {
    let runtime = Runtime::new();
    for descriptor in descriptors {
        record(&runtime, descriptor.id(), journal);
        let report = runtime.add_module(descriptor).unwrap();
        assert!(report.is_success(), "{:?}", report.errors);
    }
    runtime
}

/// Write `<root>/<dir>/plugin.xml`
pub fn write_module(root: &Path, dir: &str, xml: &str) -> PathBuf {
    let module_dir = root.join(dir);
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("plugin.xml"), xml).unwrap();
    module_dir
}
