//! Load-time entry point
//!
//! The loader runs a constructor as soon as the library is mapped into the
//! bootstrap process. Actual Rust side entry point is `entry`, which returns
//! anyhow::Result so everything below it can simply propagate errors.
//!
//! Nothing here may block the constructor: the hook is installed by a detached
//! worker thread, and every error is logged instead of unwinding into the
//! loader.

use libtendril::ffi::DynamicLinker;
use log::{debug, error, info};

use crate::bootstrap::BOOTSTRAP;
use crate::config::{self, SpawnConfig};
use crate::errors::BootstrapError;
use crate::logger::GlobalLogger;

#[cfg(all(any(target_os = "linux", target_os = "android"), not(test)))]
#[unsafe(link_section = ".init_array")]
#[used]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        spawn_hook_entry();
    }
    init
};

#[cfg(all(target_vendor = "apple", not(test)))]
#[unsafe(link_section = "__DATA,__mod_init_func")]
#[used]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        spawn_hook_entry();
    }
    init
};

/// Starts installation of the spawn hook. Runs once per process from the
/// library constructor; later calls only log the rejection.
#[unsafe(no_mangle)]
pub extern "C" fn spawn_hook_entry() {
    match entry() {
        Ok(_) => info!("spawn-hook: loaded"),
        Err(err) if is_repeated_entry(&err) => debug!("spawn-hook: {}", err),
        Err(err) => error!("spawn-hook: init error: {:?}", err),
    }
}

fn is_repeated_entry(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<BootstrapError>(),
        Some(BootstrapError::AlreadyStarted(_))
    )
}

/// Called by the hooking subsystem once it is able to install hooks.
#[unsafe(no_mangle)]
pub extern "C" fn spawn_hook_ready() {
    BOOTSTRAP.readiness().signal();
}

fn entry() -> anyhow::Result<()> {
    let loaded = SpawnConfig::load();
    let config = config::set_global(loaded.as_ref().cloned().unwrap_or_default());

    GlobalLogger::init(config);

    if let Err(err) = loaded {
        error!("Failed to load spawn hook config, using defaults: {}", err);
    }

    BOOTSTRAP.spawn_installer(config, DynamicLinker)?;

    Ok(())
}
