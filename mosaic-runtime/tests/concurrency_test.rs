//! Shared use of one runtime from several threads, and calls back into the
//! runtime from module code

mod common;

use common::{class_of, module, record, runtime_with, Journal};
use mosaic_runtime::{
    ConfigurationElement, Descriptor, FactoryRegistrar, ModuleState, Plugin, PluginError, Runtime,
    RuntimeError,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;

#[test]
fn test_parallel_starts_run_each_module_once() {
    let journal = Journal::new();
    let runtime = Arc::new(runtime_with(
        vec![
            module("core", &[]),
            module("left", &["core"]),
            module("right", &["core"]),
            module("top", &["left", "right"]),
        ],
        &journal,
    ));

    let handles: Vec<_> = ["top", "left", "right", "top", "core", "right", "top", "left"]
        .into_iter()
        .map(|id| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || runtime.start_module(id))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let mut starts = journal.with_prefix("start:");
    starts.sort();
    assert_eq!(
        starts,
        vec!["start:core", "start:left", "start:right", "start:top"]
    );
    assert!(journal.position("start:core") < journal.position("start:left"));
    assert!(journal.position("start:right") < journal.position("start:top"));
}

#[test]
fn test_queries_run_alongside_mutations() {
    let runtime = Arc::new(Runtime::new());
    runtime
        .add_module(
            Descriptor::builder("host")
                .extension_point("items")
                .location("/virtual/host")
                .build()
                .unwrap(),
        )
        .unwrap();

    let writer = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || {
            for i in 0..50 {
                let id = format!("item-{i}");
                runtime
                    .add_module(
                        Descriptor::builder(&id)
                            .extension("items", ConfigurationElement::new("extension"))
                            .location(format!("/virtual/{id}"))
                            .build()
                            .unwrap(),
                    )
                    .unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..50 {
                    let seen = runtime.get_all_extensions_for_point("items").unwrap().len();
                    assert!(seen >= last);
                    last = seen;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(runtime.get_all_extensions_for_point("items").unwrap().len(), 50);
}

/// Plugin that calls back into its own runtime from `start`
struct Meddler {
    runtime: Weak<Runtime>,
    outcomes: Arc<Mutex<Vec<String>>>,
}

impl Plugin for Meddler {
    fn start(&mut self) -> Result<(), PluginError> {
        let Some(runtime) = self.runtime.upgrade() else {
            return Err(PluginError::msg("runtime gone"));
        };
        let mut outcomes = self.outcomes.lock();
        for result in [
            runtime.start_module("meddler").map(|_| ()),
            runtime.list_modules().map(|_| ()),
            runtime.get_all_extensions_for_point("any").map(|_| ()),
        ] {
            outcomes.push(match result {
                Err(RuntimeError::Reentrant { operation }) => format!("reentrant:{operation}"),
                Err(e) => format!("error:{e}"),
                Ok(()) => "ok".to_string(),
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

#[test]
fn test_reentrant_calls_fail_fast() {
    let runtime = Arc::new(Runtime::new());
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&runtime);
    let recorded = Arc::clone(&outcomes);
    runtime
        .register_activator("meddler", move |registrar: &mut FactoryRegistrar| {
            let weak = weak.clone();
            let recorded = Arc::clone(&recorded);
            registrar.register(
                class_of("meddler"),
                move || -> Result<Box<dyn Plugin>, PluginError> {
                    Ok(Box::new(Meddler {
                        runtime: weak.clone(),
                        outcomes: Arc::clone(&recorded),
                    }))
                },
            );
            Ok(())
        })
        .unwrap();
    runtime.add_module(module("meddler", &[])).unwrap();

    runtime.start_module("meddler").unwrap();

    assert_eq!(
        *outcomes.lock(),
        vec![
            "reentrant:start_module",
            "reentrant:list_modules",
            "reentrant:get_all_extensions_for_point",
        ]
    );
    assert_eq!(runtime.module_state("meddler").unwrap(), ModuleState::Started);
}

#[test]
fn test_other_threads_wait_instead_of_failing() {
    let journal = Journal::new();
    let runtime = Arc::new(Runtime::new());
    record(&runtime, "slow", &journal);
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    runtime
        .register_activator("gate", move |registrar: &mut FactoryRegistrar| {
            let started_tx = started_tx.clone();
            let release_rx = Arc::clone(&release_rx);
            registrar.register(
                class_of("gate"),
                move || -> Result<Box<dyn Plugin>, PluginError> {
                    started_tx.send(()).ok();
                    release_rx.lock().recv().ok();
                    Ok(Box::new(mosaic_runtime::EmptyPlugin))
                },
            );
            Ok(())
        })
        .unwrap();
    runtime.add_module(module("gate", &[])).unwrap();
    runtime.add_module(module("slow", &[])).unwrap();

    let starter = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || runtime.start_module("gate"))
    };
    started_rx.recv().unwrap();

    // The exclusive lock is held by the starter; this thread blocks, not errors
    let querier = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || runtime.module_state("gate"))
    };
    release_tx.send(()).unwrap();

    starter.join().unwrap().unwrap();
    assert_eq!(querier.join().unwrap().unwrap(), ModuleState::Started);
    runtime.start_module("slow").unwrap();
}
