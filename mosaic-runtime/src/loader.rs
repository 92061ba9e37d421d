//! Native library loader using libloading
//!
//! A [`NativeLibrary`] owns the OS handle of one module library. Every
//! symbol it hands out borrows the loader, and [`NativeLibrary::unload`]
//! takes `&mut self`, so a library cannot be unloaded while a symbol is
//! still reachable. Objects that outlive a borrow, such as executables
//! built by library factories, hold a [`LibraryHandle`] instead; the OS
//! handle is closed when the last one goes away.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during library loading and symbol lookup
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Library not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to open library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Library {path} previously failed to load: {reason}")]
    Failed { path: PathBuf, reason: String },

    #[error("Library {0} is not loaded")]
    NotLoaded(PathBuf),

    #[error("Symbol not found: {symbol} in {path}")]
    SymbolNotFound {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("API version mismatch in {path}: expected {expected}, got {actual}")]
    ApiVersionMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },
}

enum LibraryState {
    Unloaded,
    Loaded(Arc<libloading::Library>),
    Failed(String),
}

/// Shared ownership of a loaded library
///
/// Keeps the code of the library mapped while held, even after the
/// owning [`NativeLibrary`] has been unloaded.
#[derive(Clone)]
pub struct LibraryHandle(Arc<libloading::Library>);

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LibraryHandle({} holders)", Arc::strong_count(&self.0))
    }
}

/// Lazily loaded native library of a module
pub struct NativeLibrary {
    path: PathBuf,
    state: LibraryState,
}

/// Opaque address of a symbol, valid while the library stays borrowed
#[derive(Clone, Copy)]
pub struct SymbolAddress<'lib> {
    address: *const c_void,
    _library: PhantomData<&'lib NativeLibrary>,
}

impl<'lib> SymbolAddress<'lib> {
    pub fn as_ptr(&self) -> *const c_void {
        self.address
    }
}

impl fmt::Debug for SymbolAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolAddress({:p})", self.address)
    }
}

/// Decorate a library name for the current platform and place it in the
/// module directory
///
/// `core` becomes `<root>/libcore.so` on Linux, `<root>/libcore.dylib` on
/// macOS and `<root>\core.dll` on Windows. Names that already carry the
/// platform suffix are used as-is.
pub fn resolve(module_root: impl AsRef<Path>, library_name: &str) -> PathBuf {
    let suffix = std::env::consts::DLL_SUFFIX;
    let file_name = if library_name.ends_with(suffix) {
        library_name.to_string()
    } else {
        format!("{}{}{}", std::env::consts::DLL_PREFIX, library_name, suffix)
    };
    module_root.as_ref().join(file_name)
}

impl NativeLibrary {
    /// Create an unloaded library for an already resolved path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: LibraryState::Unloaded,
        }
    }

    /// Create an unloaded library for `library_name` inside `module_root`
    pub fn for_module(module_root: impl AsRef<Path>, library_name: &str) -> Self {
        Self::new(resolve(module_root, library_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LibraryState::Loaded(_))
    }

    /// Load the library
    ///
    /// Idempotent: a loaded library stays loaded and its initializers do not
    /// run again. A failed load is terminal; later calls return
    /// [`LibraryError::Failed`] without touching the file system.
    pub fn load(&mut self) -> Result<(), LibraryError> {
        match &self.state {
            LibraryState::Loaded(_) => return Ok(()),
            LibraryState::Failed(reason) => {
                return Err(LibraryError::Failed {
                    path: self.path.clone(),
                    reason: reason.clone(),
                })
            }
            LibraryState::Unloaded => {}
        }

        if !self.path.exists() {
            let err = LibraryError::NotFound(self.path.clone());
            self.state = LibraryState::Failed(err.to_string());
            return Err(err);
        }

        // SAFETY: opening a library runs its initializers. Module libraries
        // are trusted code installed next to their descriptor.
        match unsafe { libloading::Library::new(&self.path) } {
            Ok(library) => {
                tracing::debug!(path = %self.path.display(), "Native library loaded");
                self.state = LibraryState::Loaded(Arc::new(library));
                Ok(())
            }
            Err(source) => {
                self.state = LibraryState::Failed(source.to_string());
                Err(LibraryError::Open {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Look up a typed symbol
    ///
    /// Calling this before [`load`](Self::load) is a caller bug and returns
    /// [`LibraryError::NotLoaded`].
    ///
    /// # Safety
    /// `T` must match the actual type of the exported symbol.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>, LibraryError> {
        let library = self.loaded()?;
        library
            .get::<T>(name.as_bytes())
            .map_err(|source| LibraryError::SymbolNotFound {
                symbol: name.to_string(),
                path: self.path.clone(),
                source,
            })
    }

    /// Look up the address of a symbol without interpreting it
    pub fn address(&self, name: &str) -> Result<SymbolAddress<'_>, LibraryError> {
        // SAFETY: the symbol is read as an untyped pointer and never called
        // or dereferenced here.
        let symbol = unsafe { self.symbol::<*const c_void>(name)? };
        Ok(SymbolAddress {
            address: *symbol,
            _library: PhantomData,
        })
    }

    /// Whether the library exports `name`
    pub fn has_symbol(&self, name: &str) -> bool {
        self.address(name).is_ok()
    }

    /// Shared handle keeping the loaded library mapped
    pub fn handle(&self) -> Option<LibraryHandle> {
        match &self.state {
            LibraryState::Loaded(library) => Some(LibraryHandle(Arc::clone(library))),
            _ => None,
        }
    }

    /// Unload the library
    ///
    /// Idempotent. A failed library stays failed. While [`LibraryHandle`]s
    /// are outstanding the OS handle stays open and is closed by the last
    /// holder.
    pub fn unload(&mut self) -> Result<(), LibraryError> {
        if let LibraryState::Loaded(_) = self.state {
            if let LibraryState::Loaded(library) =
                std::mem::replace(&mut self.state, LibraryState::Unloaded)
            {
                match Arc::try_unwrap(library) {
                    Ok(library) => {
                        library.close().map_err(|source| LibraryError::Open {
                            path: self.path.clone(),
                            source,
                        })?;
                        tracing::debug!(path = %self.path.display(), "Native library unloaded");
                    }
                    Err(shared) => {
                        tracing::debug!(
                            path = %self.path.display(),
                            holders = Arc::strong_count(&shared) - 1,
                            "Native library still referenced, close deferred"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn loaded(&self) -> Result<&libloading::Library, LibraryError> {
        match &self.state {
            LibraryState::Loaded(library) => Ok(library.as_ref()),
            _ => Err(LibraryError::NotLoaded(self.path.clone())),
        }
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            LibraryState::Unloaded => "unloaded",
            LibraryState::Loaded(_) => "loaded",
            LibraryState::Failed(_) => "failed",
        };
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .field("state", &state)
            .finish()
    }
}
