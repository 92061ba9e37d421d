//! mosaic-launcher: command-line front end for the mosaic module runtime
//!
//! One launch discovers modules, disables and starts what was asked for,
//! optionally prints the module table, and shuts the runtime down again.
//!
//! Exit codes follow the usual split: 0 on success, 1 when a requested
//! module could not be started, 101 when the launcher itself could not run
//! (unreadable profile, unwritable event log).

pub mod cli;
pub mod tracing_support;

pub use cli::{Cli, LogFormat};

use anyhow::Context;
use mosaic_runtime::events::FileEventSink;
use mosaic_runtime::{default_module_dirs, ModuleInfo, Profile, Runtime};
use std::io::Write;
use std::sync::Arc;

/// Application name used for the per-user module directory
pub const APP_NAME: &str = "mosaic";

/// A requested module failed to start
pub const EXIT_START_FAILED: i32 = 1;

/// The launcher could not run
pub const EXIT_SYSTEM: i32 = 101;

/// Merge the profile file (if any) with command-line overrides
///
/// Falls back to [`default_module_dirs`] when neither names a directory.
pub fn profile_for(cli: &Cli) -> anyhow::Result<Profile> {
    let mut profile = match &cli.profile {
        Some(path) => Profile::load(path)
            .with_context(|| format!("failed to load profile {}", path.display()))?,
        None => Profile::default(),
    };

    profile.module_dirs.extend(cli.modules.iter().cloned());
    if profile.module_dirs.is_empty() {
        profile.module_dirs = default_module_dirs(APP_NAME);
    }
    profile.start.extend(cli.start.iter().cloned());
    profile.disabled.extend(cli.disable.iter().cloned());
    if cli.unload_on_stop {
        profile.unload_libraries_on_stop = Some(true);
    }

    Ok(profile)
}

/// Run one launch, writing any listing to `out`, and return the exit code
pub fn run(cli: &Cli, out: &mut impl Write) -> anyhow::Result<i32> {
    let profile = profile_for(cli)?;

    let mut runtime = Runtime::with_config(profile.runtime_config());
    if let Some(path) = &cli.events {
        let sink = FileEventSink::new(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        runtime = runtime.with_event_sink(Arc::new(sink));
    }

    let report = profile.apply(&runtime)?;
    for error in &report.errors {
        tracing::warn!(error = %error, "Discovery problem");
    }
    tracing::info!(
        added = report.added.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "Module discovery finished"
    );

    let failures = profile.start(&runtime);

    if cli.list {
        let modules = runtime.list_modules()?;
        if cli.json {
            write_json(out, &modules)?;
        } else {
            write_table(out, &modules)?;
        }
    }

    runtime.shutdown()?;

    Ok(if failures.is_empty() {
        0
    } else {
        EXIT_START_FAILED
    })
}

fn write_json(out: &mut impl Write, modules: &[ModuleInfo]) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, modules)?;
    writeln!(out)?;
    Ok(())
}

fn write_table(out: &mut impl Write, modules: &[ModuleInfo]) -> std::io::Result<()> {
    for module in modules {
        let mut line = format!(
            "{:<32} {:<10} {:<10}",
            module.id,
            module.version.as_deref().unwrap_or("-"),
            module.state.to_string(),
        );
        if !module.enabled {
            line.push_str(" disabled");
        }
        if let Some(reason) = &module.failure {
            line.push_str(&format!(" ({reason})"));
        }
        writeln!(out, "{}", line.trim_end())?;
    }
    Ok(())
}
