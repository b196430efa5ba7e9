//! Injection bootstrap
//!
//! Holds the genuine `posix_spawn` once our replacement is installed over it.
//! Installation runs on a detached background thread and moves the state
//! machine `Uninstalled -> InstallPending -> Installed`, or into `Failed` when
//! something along the way is missing. There are no reverse transitions and
//! no retries.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use libc::{c_char, c_int, pid_t, posix_spawn_file_actions_t, posix_spawnattr_t};
use libtendril::ffi::{OnceFnPtr, SymbolResolver};
use libtendril::hook::{HookInstaller, SubstrateHook};
use log::{debug, error, info};
use parking_lot::Mutex;

use crate::config::SpawnConfig;
use crate::errors::{BootstrapError, BootstrapResult};
use crate::readiness::Readiness;

/// `int posix_spawn(pid_t *, const char *, const posix_spawn_file_actions_t *,
/// const posix_spawnattr_t *, char *const argv[], char *const envp[])`
pub type PosixSpawnFn = unsafe extern "C" fn(
    *mut pid_t,
    *const c_char,
    *const posix_spawn_file_actions_t,
    *const posix_spawnattr_t,
    *const *mut c_char,
    *const *mut c_char,
) -> c_int;

/// Process-wide bootstrap used by the exported entry points.
pub static BOOTSTRAP: LazyLock<InjectionBootstrap> = LazyLock::new(InjectionBootstrap::new);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Uninstalled = 0,
    InstallPending = 1,
    Installed = 2,
    Failed = 3,
}

impl BootstrapState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BootstrapState::Uninstalled,
            1 => BootstrapState::InstallPending,
            2 => BootstrapState::Installed,
            _ => BootstrapState::Failed,
        }
    }
}

#[derive(Debug)]
pub struct InjectionBootstrap {
    state: AtomicU8,
    original: OnceFnPtr<PosixSpawnFn>,
    readiness: Readiness,
    failure: Mutex<Option<String>>,
}

impl Default for InjectionBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectionBootstrap {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(BootstrapState::Uninstalled as u8),
            original: OnceFnPtr::new(),
            readiness: Readiness::new(),
            failure: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BootstrapState {
        BootstrapState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: BootstrapState, to: BootstrapState) -> Result<(), BootstrapState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| debug!("Bootstrap state: {:?} -> {:?}", from, to))
            .map_err(BootstrapState::from_u8)
    }

    /// Gate the external hooking subsystem completes once it is safe to hook.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// The genuine process-creation entry point, once installed.
    pub fn original(&self) -> Option<PosixSpawnFn> {
        // Safety: publish() is the only writer, and it only stores the value
        // returned by hooking posix_spawn
        unsafe { self.original.get() }
    }

    /// Description of the error that moved the bootstrap into `Failed`.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Enters `InstallPending`. Only the first call succeeds.
    pub fn begin_install(&self) -> BootstrapResult<()> {
        self.transition(BootstrapState::Uninstalled, BootstrapState::InstallPending)
            .map_err(BootstrapError::AlreadyStarted)
    }

    /// Publishes the original entry point and enters `Installed`.
    pub fn publish(&self, original: NonNull<c_void>) -> BootstrapResult<()> {
        let state = self.state();
        if state != BootstrapState::InstallPending {
            return Err(BootstrapError::NotPending(state));
        }

        self.original.publish(original.as_ptr())?;

        self.transition(BootstrapState::InstallPending, BootstrapState::Installed)
            .map_err(BootstrapError::NotPending)?;

        info!("posix_spawn hooked, original entry at {:p}", original);
        Ok(())
    }

    /// Records `err` and enters `Failed`.
    pub fn fail(&self, err: &BootstrapError) {
        error!("Spawn hook installation failed: {}", err);

        *self.failure.lock() = Some(err.to_string());

        if let Err(state) = self.transition(BootstrapState::InstallPending, BootstrapState::Failed) {
            debug!("Failure recorded outside InstallPending (state: {:?})", state);
        }
    }

    fn wait_ready(&self, config: &SpawnConfig) -> BootstrapResult<()> {
        let timeout = config.readiness_timeout();

        if self.readiness.wait_for(timeout) {
            debug!("Hooking subsystem reported ready");
            return Ok(());
        }

        if config.require_readiness_signal {
            return Err(BootstrapError::ReadinessTimeout(timeout));
        }

        debug!("No readiness signal after {:?}, proceeding", timeout);
        Ok(())
    }

    fn resolve_symbol(
        resolver: &dyn SymbolResolver,
        library: Option<&str>,
        symbol: &str,
    ) -> BootstrapResult<NonNull<c_void>> {
        resolver
            .resolve(library, symbol)
            .map_err(|source| BootstrapError::SymbolUnavailable {
                symbol: symbol.to_string(),
                source,
            })
    }

    fn resolve_targets(
        config: &SpawnConfig,
        resolver: &dyn SymbolResolver,
    ) -> BootstrapResult<(NonNull<c_void>, NonNull<c_void>)> {
        let target = Self::resolve_symbol(resolver, config.spawn_library.as_deref(), &config.spawn_symbol)?;
        let replacement = Self::resolve_symbol(resolver, None, &config.replacement_symbol)?;

        debug!(
            "Resolved {} at {:p}, {} at {:p}",
            config.spawn_symbol, target, config.replacement_symbol, replacement
        );

        Ok((target, replacement))
    }

    fn hook_and_publish(
        &self,
        installer: &dyn HookInstaller,
        target: NonNull<c_void>,
        replacement: NonNull<c_void>,
    ) -> BootstrapResult<()> {
        // Safety: both symbols were resolved under the posix_spawn signature
        let original = unsafe { installer.hook_function(target, replacement) }?;

        self.publish(original)
    }

    /// Installs the replacement through an already available hook primitive.
    pub fn install_with(
        &self,
        config: &SpawnConfig,
        resolver: &dyn SymbolResolver,
        installer: &dyn HookInstaller,
    ) -> BootstrapResult<()> {
        let (target, replacement) = Self::resolve_targets(config, resolver)?;

        self.hook_and_publish(installer, target, replacement)
    }

    /// Body of the installation task: waits for readiness, resolves
    /// `posix_spawn`, our replacement and the hook primitive, hooks and
    /// publishes the original.
    pub fn install(&self, config: &SpawnConfig, resolver: &dyn SymbolResolver) -> BootstrapResult<()> {
        self.wait_ready(config)?;

        let (target, replacement) = Self::resolve_targets(config, resolver)?;

        let installer = SubstrateHook::resolve(resolver, config.hook_library.as_deref(), &config.hook_symbol)
            .map_err(BootstrapError::HookPrimitiveUnavailable)?;

        self.hook_and_publish(&installer, target, replacement)
    }

    /// Enters `InstallPending` and runs [`InjectionBootstrap::install`] on a
    /// detached thread. Nobody joins the thread; its outcome is visible
    /// through [`InjectionBootstrap::state`] and the log.
    pub fn spawn_installer<R>(&'static self, config: &'static SpawnConfig, resolver: R) -> BootstrapResult<()>
    where
        R: SymbolResolver + 'static,
    {
        self.begin_install()?;

        let spawned = thread::Builder::new()
            .name("tendril-spawn-install".to_string())
            .spawn(move || {
                if let Err(err) = self.install(config, &resolver) {
                    self.fail(&err);
                }
            });

        match spawned {
            Ok(_detached) => Ok(()),
            Err(err) => {
                let err = BootstrapError::from(err);
                self.fail(&err);
                Err(err)
            }
        }
    }
}
