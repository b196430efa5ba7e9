use thiserror::Error;

use crate::ffi::DlError;
use crate::memory::MemoryError;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Hook primitive '{symbol}' unavailable: {source}")]
    PrimitiveUnavailable {
        symbol: String,
        #[source]
        source: DlError,
    },

    #[error("Hook primitive did not return the original function for target 0x{0:X}")]
    OriginalNotReturned(usize),
}

#[derive(Debug, Error)]
pub enum SizingError {
    #[error("Target is not readable executable memory: {0}")]
    UnreadableTarget(#[from] MemoryError),

    #[error("No instruction classifier for architecture '{0}'")]
    UnsupportedArchitecture(&'static str),
}

pub type HookResult<T> = std::result::Result<T, HookError>;
pub type SizingResult<T> = std::result::Result<T, SizingError>;
