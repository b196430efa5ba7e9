use std::ptr::{self, NonNull};

use libc::c_void;

use super::errors::{HookError, HookResult};
use crate::ffi::SymbolResolver;

/// Generic function hook primitive supplied by a hooking subsystem.
pub trait HookInstaller: Send + Sync {
    /// Redirects `target` to `replacement` and returns the address through
    /// which the original behaviour can still be called.
    ///
    /// # Safety
    /// Both addresses must be functions with the same ABI, and `target` must
    /// be safe to patch while other threads may be executing it.
    unsafe fn hook_function(
        &self,
        target: NonNull<c_void>,
        replacement: NonNull<c_void>,
    ) -> HookResult<NonNull<c_void>>;
}

/// `void MSHookFunction(void *symbol, void *replace, void **result)`
pub type MSHookFunctionFn = unsafe extern "C" fn(*mut c_void, *mut c_void, *mut *mut c_void);

/// [`HookInstaller`] backed by a Substrate-compatible `MSHookFunction`.
#[derive(Debug, Clone, Copy)]
pub struct SubstrateHook {
    hook_fn: MSHookFunctionFn,
}

impl SubstrateHook {
    pub fn new(hook_fn: MSHookFunctionFn) -> Self {
        Self { hook_fn }
    }

    /// Looks the primitive up through `resolver`.
    pub fn resolve(
        resolver: &dyn SymbolResolver,
        library: Option<&str>,
        symbol: &str,
    ) -> HookResult<Self> {
        let addr = resolver
            .resolve(library, symbol)
            .map_err(|source| HookError::PrimitiveUnavailable {
                symbol: symbol.to_string(),
                source,
            })?;

        log::debug!("Hook primitive '{}' at {:p}", symbol, addr);

        // Safety: the symbol is documented to have the MSHookFunction signature
        let hook_fn = unsafe { std::mem::transmute::<*mut c_void, MSHookFunctionFn>(addr.as_ptr()) };

        Ok(Self::new(hook_fn))
    }
}

impl HookInstaller for SubstrateHook {
    unsafe fn hook_function(
        &self,
        target: NonNull<c_void>,
        replacement: NonNull<c_void>,
    ) -> HookResult<NonNull<c_void>> {
        let mut original: *mut c_void = ptr::null_mut();

        unsafe { (self.hook_fn)(target.as_ptr(), replacement.as_ptr(), &mut original) };

        NonNull::new(original).ok_or(HookError::OriginalNotReturned(target.as_ptr() as usize))
    }
}
