use std::path::PathBuf;
use std::time::Duration;

use libtendril::ffi::{DlError, EnvError, FnPtrError};
use libtendril::hook::HookError;
use thiserror::Error;

use crate::bootstrap::BootstrapState;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Library path must be absolute: {0}")]
    RelativeLibraryPath(PathBuf),

    #[error("Config field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid preload variable name: '{0}'")]
    InvalidPreloadVariable(String),

    #[error("Environment capacity {capacity} is below the minimum of {minimum} bytes")]
    CapacityTooSmall { capacity: usize, minimum: usize },

    #[error("Spawn failure code must be nonzero")]
    ZeroFailureCode,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Installation already started (state: {0:?})")]
    AlreadyStarted(BootstrapState),

    #[error("Installation is not pending (state: {0:?})")]
    NotPending(BootstrapState),

    #[error("Hooking subsystem not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Failed to resolve '{symbol}': {source}")]
    SymbolUnavailable {
        symbol: String,
        #[source]
        source: DlError,
    },

    #[error("Hook primitive unavailable: {0}")]
    HookPrimitiveUnavailable(#[source] HookError),

    #[error("Hook installation failed: {0}")]
    Hook(#[from] HookError),

    #[error("Failed to publish original entry: {0}")]
    Publish(#[from] FnPtrError),

    #[error("Failed to start installer thread: {0}")]
    Thread(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("Process spawned before installation completed")]
    SpawnBeforeInstall,

    #[error("Environment block error: {0}")]
    Environment(#[from] EnvError),
}

impl InterceptError {
    /// Status code handed back to the caller of the intercepted spawn.
    pub fn status(&self, spawn_failure_code: libc::c_int) -> libc::c_int {
        match self {
            InterceptError::SpawnBeforeInstall => spawn_failure_code,
            InterceptError::Environment(EnvError::Overflow { .. }) => libc::E2BIG,
            InterceptError::Environment(EnvError::CapacityTooSmall(_)) => libc::E2BIG,
            InterceptError::Environment(EnvError::NulError(_)) => libc::EINVAL,
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;
pub type InterceptResult<T> = std::result::Result<T, InterceptError>;
