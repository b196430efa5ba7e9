//! Spawn interceptor
//!
//! Replacement for `posix_spawn`. Every spawn gets the injection library
//! appended to its loader preload variable, so the engine follows the process
//! tree without any per-process setup.

use std::ffi::CStr;

use libc::{c_char, c_int, pid_t, posix_spawn_file_actions_t, posix_spawnattr_t};
use libtendril::ffi::{EnvBlock, env_entry};
use log::{debug, error, trace, warn};

use crate::bootstrap::{BOOTSTRAP, InjectionBootstrap, PosixSpawnFn};
use crate::config::{self, SpawnConfig};
use crate::errors::{InterceptError, InterceptResult};

/// The six arguments of one `posix_spawn` call.
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest {
    pub pid: *mut pid_t,
    pub path: *const c_char,
    pub file_actions: *const posix_spawn_file_actions_t,
    pub attrp: *const posix_spawnattr_t,
    pub argv: *const *mut c_char,
    pub envp: *const *mut c_char,
}

impl SpawnRequest {
    /// Executable path bytes, empty for a null path.
    ///
    /// # Safety
    /// `path` must be null or a valid C string.
    unsafe fn path_bytes(&self) -> &[u8] {
        if self.path.is_null() {
            return &[];
        }

        unsafe { CStr::from_ptr(self.path) }.to_bytes()
    }

    /// Forwards the request to `original` with `envp` swapped in.
    ///
    /// # Safety
    /// Same contract as `posix_spawn` itself.
    unsafe fn forward(&self, original: PosixSpawnFn, envp: *const *mut c_char) -> c_int {
        unsafe {
            original(
                self.pid,
                self.path,
                self.file_actions,
                self.attrp,
                self.argv,
                envp,
            )
        }
    }
}

/// Builds the environment for a spawn of `path`: the caller's entries in
/// order, followed by `NAME=<library>`.
///
/// # Safety
/// `envp` must be null or a null-terminated array of valid C strings which
/// outlive the returned block.
pub unsafe fn build_environment<'a>(
    config: &SpawnConfig,
    path: &[u8],
    envp: *const *mut c_char,
) -> InterceptResult<EnvBlock<'a>> {
    let library = config.select_library(path);

    let mut block = unsafe { EnvBlock::from_raw(envp.cast(), config.env_capacity_bytes) }?;
    block.push(env_entry(&config.preload_variable, library.as_os_str())?)?;

    trace!(
        "Injecting {} into {} ({} env entries)",
        library.display(),
        String::from_utf8_lossy(path),
        block.len()
    );

    Ok(block)
}

unsafe fn try_intercept(
    bootstrap: &InjectionBootstrap,
    config: &SpawnConfig,
    request: &SpawnRequest,
) -> InterceptResult<c_int> {
    let original = bootstrap.original().ok_or(InterceptError::SpawnBeforeInstall)?;

    let path = unsafe { request.path_bytes() };
    let envp = unsafe { build_environment(config, path, request.envp) }?;

    debug!("Forwarding spawn with {} env entries", envp.len());

    Ok(unsafe { request.forward(original, envp.as_envp()) })
}

/// Handles one intercepted spawn against `bootstrap`.
///
/// Returns the original routine's status unchanged, or a nonzero failure
/// code when the spawn cannot be forwarded.
///
/// # Safety
/// `request` must satisfy the `posix_spawn` contract.
pub unsafe fn intercept_spawn(
    bootstrap: &InjectionBootstrap,
    config: &SpawnConfig,
    request: &SpawnRequest,
) -> c_int {
    match unsafe { try_intercept(bootstrap, config, request) } {
        Ok(status) => status,

        Err(err) => {
            match &err {
                InterceptError::SpawnBeforeInstall => warn!("{}", err),
                _ => error!("Spawn interception failed: {}", err),
            }

            err.status(config.spawn_failure_code)
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn replacement_posix_spawn(
    pid: *mut pid_t,
    path: *const c_char,
    file_actions: *const posix_spawn_file_actions_t,
    attrp: *const posix_spawnattr_t,
    argv: *const *mut c_char,
    envp: *const *mut c_char,
) -> c_int {
    let request = SpawnRequest {
        pid,
        path,
        file_actions,
        attrp,
        argv,
        envp,
    };

    unsafe { intercept_spawn(&BOOTSTRAP, config::global(), &request) }
}
