//! Hello Module - a minimal native module built with mosaic-sdk
//!
//! Build with `cargo build --release` and copy the library next to
//! `plugin.xml` in a module directory:
//!
//! ```text
//! modules/hello/plugin.xml
//! modules/hello/libhello_module.so
//! ```
//!
//! then run `mosaic-launcher -m modules --start hello --list`.

use mosaic_sdk::prelude::*;

#[derive(Default)]
struct HelloPlugin {
    greeted: usize,
}

impl Plugin for HelloPlugin {
    fn start(&mut self) -> Result<(), PluginError> {
        self.greeted += 1;
        eprintln!("hello: started ({} time(s))", self.greeted);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PluginError> {
        eprintln!("hello: stopped");
        Ok(())
    }
}

fn register(registrar: &mut FactoryRegistrar) {
    // Key matches the `class` attribute in plugin.xml
    registrar.register_default::<HelloPlugin>("hello.Plugin");
}

export_module!(register);
