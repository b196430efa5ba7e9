//! Dynamic symbol resolution
//!
//! Thin wrappers around `dlopen`/`dlsym` plus the [`SymbolResolver`] seam used
//! by the spawn hook installation path.

use std::ffi::{CStr, CString, NulError};
use std::ptr::{self, NonNull};

use libc::{c_int, c_void};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DlError {
    #[error("Interior nul bytes found: {0}")]
    NulError(#[from] NulError),

    #[error("dlopen failed for '{library}': {reason}")]
    LibraryNotLoaded { library: String, reason: String },

    #[error("Symbol address is NULL for function: {0}")]
    SymbolIsNull(String),
}

pub type DlResult<T> = std::result::Result<T, DlError>;

/// Maps `(library, symbol)` to an executable address.
///
/// `library == None` means the global scope of the running process.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, library: Option<&str>, symbol: &str) -> DlResult<NonNull<c_void>>;
}

/// [`SymbolResolver`] backed by the platform dynamic linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLinker;

impl SymbolResolver for DynamicLinker {
    fn resolve(&self, library: Option<&str>, symbol: &str) -> DlResult<NonNull<c_void>> {
        dl_sym_in(library, symbol)
    }
}

fn last_dl_error() -> String {
    // Safety: dlerror returns NULL or a valid thread-local C string
    unsafe {
        let msg = libc::dlerror();

        if msg.is_null() {
            return "unknown error".to_string();
        }

        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

/// dlopen(...)
///
/// Handles are intentionally never passed to `dlclose`, the resolved
/// addresses must stay valid for the lifetime of the process.
pub fn dl_open(library: Option<&str>, flags: c_int) -> DlResult<NonNull<c_void>> {
    let handle = match library {
        Some(path) => {
            let path = CString::new(path)?;
            unsafe { libc::dlopen(path.as_ptr(), flags) }
        }

        None => unsafe { libc::dlopen(ptr::null(), flags) },
    };

    NonNull::new(handle).ok_or_else(|| DlError::LibraryNotLoaded {
        library: library.unwrap_or("<main program>").to_string(),
        reason: last_dl_error(),
    })
}

/// dlsym(...)
pub fn dl_sym(handle: NonNull<c_void>, symbol: &str) -> DlResult<NonNull<c_void>> {
    let name = CString::new(symbol)?;

    let addr = unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) };

    NonNull::new(addr).ok_or_else(|| DlError::SymbolIsNull(symbol.to_string()))
}

/// Resolves `symbol` in `library`, loading it with `RTLD_NOW` if needed.
pub fn dl_sym_in(library: Option<&str>, symbol: &str) -> DlResult<NonNull<c_void>> {
    let handle = dl_open(library, libc::RTLD_NOW)?;
    let addr = dl_sym(handle, symbol)?;

    log::trace!(
        "Resolved '{}' in {} at {:p}",
        symbol,
        library.unwrap_or("<global scope>"),
        addr
    );

    Ok(addr)
}
