//! mosaic-sdk: SDK for building native mosaic modules
//!
//! A native module is a `cdylib` exporting two C symbols: one reporting the
//! ABI version it was built against, and one registering its executable
//! factories. [`export_module!`] generates both.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mosaic_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct Viewer;
//!
//! impl Plugin for Viewer {
//!     fn start(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//!
//!     fn stop(&mut self) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! fn register(registrar: &mut FactoryRegistrar) {
//!     registrar.register_default::<Viewer>("viewer.Plugin");
//! }
//!
//! export_module!(register);
//! ```

pub use mosaic_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::export_module;
    pub use mosaic_api::{
        EmptyPlugin, ExecutableFactory, FactoryRegistrar, Plugin, PluginError, API_VERSION,
    };
}

/// Export the entry points the runtime looks up when it loads a module
///
/// `$register` is any `fn(&mut FactoryRegistrar)`. The generated
/// `mosaic_module_register` ignores a null registrar.
#[macro_export]
macro_rules! export_module {
    ($register:path) => {
        #[no_mangle]
        pub extern "C" fn mosaic_module_abi_version() -> u32 {
            $crate::API_VERSION
        }

        /// # Safety
        /// `registrar` must be null or point to a live `FactoryRegistrar`.
        #[no_mangle]
        pub unsafe extern "C" fn mosaic_module_register(registrar: *mut $crate::FactoryRegistrar) {
            if let Some(registrar) = registrar.as_mut() {
                $register(registrar);
            }
        }
    };
}
