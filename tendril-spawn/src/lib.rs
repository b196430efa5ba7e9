//! Tendril spawn hook
//!
//! Library loaded into the privileged bootstrap process. Once the hooking
//! subsystem is ready it redirects `posix_spawn` to [`interceptor::replacement_posix_spawn`],
//! which adds the injection library to the preload variable of every new
//! process. Processes spawned through the bootstrap process itself receive
//! this library instead, so the hook follows the whole process tree.
//!
//! Exported symbols:
//! - `spawn_hook_entry`: load-time initialization, also run by the constructor
//! - `spawn_hook_ready`: readiness signal for the hooking subsystem
//! - `replacement_posix_spawn`: the interceptor itself

pub mod bootstrap;
pub mod config;
pub mod entry;
pub mod errors;
pub mod interceptor;
pub mod logger;
pub mod readiness;
