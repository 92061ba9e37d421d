//! mosaic-runtime: module runtime for mosaic applications
//!
//! Discovers module directories, resolves requirements between modules,
//! loads native libraries lazily, drives plugin lifecycles and keeps the
//! registry of extension points and extensions.
//!
//! ```no_run
//! use mosaic_runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! let report = runtime.add_module_directory("modules")?;
//! for err in &report.errors {
//!     eprintln!("{err}");
//! }
//! runtime.start_module("app.main")?;
//! for extension in runtime.get_all_extensions_for_point("app.commands")? {
//!     println!("{}", extension.label());
//! }
//! runtime.shutdown()?;
//! # Ok::<(), mosaic_runtime::RuntimeError>(())
//! ```

pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod element;
pub mod events;
pub mod extension;
pub mod factory;
pub mod graph;
pub mod loader;
pub mod module;
pub mod runtime;
pub mod version;

pub use config::{ConfigError, Profile, RuntimeConfig};
pub use descriptor::{Descriptor, DescriptorBuilder, DescriptorError};
pub use discovery::{default_module_dirs, DiscoveryError, DiscoveryReport, ModuleScanner};
pub use element::ConfigurationElement;
pub use events::{EventSink, MemoryEventSink, RuntimeEvent, RuntimeEventKind};
pub use extension::{
    ElementSchema, Extension, ExtensionPoint, RegistryError, Validation, ValidationReport,
    Validator,
};
pub use factory::{Executable, FactoryError};
pub use graph::DependencyError;
pub use loader::{LibraryError, LibraryHandle, NativeLibrary};
pub use module::{ModuleInfo, ModuleState};
pub use runtime::{Activator, Runtime, RuntimeError};
pub use version::{Version, VersionConstraint};

pub use mosaic_api::{EmptyPlugin, FactoryRegistrar, Plugin, PluginError, API_VERSION};
