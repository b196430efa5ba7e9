//! Spawn hook configuration
//!
//! Defaults describe the deployed layout. A JSON file named by
//! `TENDRIL_SPAWN_CONFIG` may override any subset of the fields.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use std::{env, fs};

use libtendril::ffi::ENV_BLOCK_CAPACITY_BYTES;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_VAR: &str = "TENDRIL_SPAWN_CONFIG";

#[cfg(target_vendor = "apple")]
mod defaults {
    pub const PRELOAD_VARIABLE: &str = "DYLD_INSERT_LIBRARIES";
    pub const DEFAULT_LIBRARY: &str = "/usr/local/lib/libinjector.dylib";
    pub const BOOTSTRAP_LIBRARY: &str = "/usr/local/lib/spawn_hook.dylib";
    pub const SPAWN_LIBRARY: Option<&str> = Some("/usr/lib/system/libdyld.dylib");
    pub const HOOK_LIBRARY: &str = "/usr/local/lib/libsubstrate.dylib";
}

#[cfg(not(target_vendor = "apple"))]
mod defaults {
    pub const PRELOAD_VARIABLE: &str = "LD_PRELOAD";
    pub const DEFAULT_LIBRARY: &str = "/usr/local/lib/libinjector.so";
    pub const BOOTSTRAP_LIBRARY: &str = "/usr/local/lib/libspawn_hook.so";
    pub const SPAWN_LIBRARY: Option<&str> = None;
    pub const HOOK_LIBRARY: &str = "/usr/local/lib/libsubstrate.so";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Loader variable that receives the injection library path.
    pub preload_variable: String,

    /// Library injected into ordinary processes.
    pub default_library: PathBuf,

    /// Library injected into the privileged bootstrap process.
    pub bootstrap_library: PathBuf,

    /// Path substring identifying the privileged bootstrap process.
    pub bootstrap_marker: String,

    /// Image exporting the process-creation primitive, `None` for global scope.
    pub spawn_library: Option<String>,
    pub spawn_symbol: String,

    /// Exported name of our replacement routine.
    pub replacement_symbol: String,

    /// Image and symbol of the generic hook primitive.
    pub hook_library: Option<String>,
    pub hook_symbol: String,

    /// Upper bound on the wait for the hooking subsystem to report readiness.
    pub readiness_timeout_ms: u64,

    /// Treat an expired readiness wait as a failed installation instead of
    /// proceeding after the delay.
    pub require_readiness_signal: bool,

    /// Capacity of the working environment block, in bytes of pointer slots.
    pub env_capacity_bytes: usize,

    /// Returned to callers that spawn before installation has completed.
    pub spawn_failure_code: i32,

    pub log_file: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            preload_variable: defaults::PRELOAD_VARIABLE.to_string(),
            default_library: PathBuf::from(defaults::DEFAULT_LIBRARY),
            bootstrap_library: PathBuf::from(defaults::BOOTSTRAP_LIBRARY),
            bootstrap_marker: "xpcproxy".to_string(),
            spawn_library: defaults::SPAWN_LIBRARY.map(str::to_string),
            spawn_symbol: "posix_spawn".to_string(),
            replacement_symbol: "replacement_posix_spawn".to_string(),
            hook_library: Some(defaults::HOOK_LIBRARY.to_string()),
            hook_symbol: "MSHookFunction".to_string(),
            readiness_timeout_ms: 2000,
            require_readiness_signal: false,
            env_capacity_bytes: ENV_BLOCK_CAPACITY_BYTES,
            spawn_failure_code: 1,
            log_file: None,
            log_level: LevelFilter::Info,
        }
    }
}

impl SpawnConfig {
    /// Loads the config named by [`CONFIG_PATH_VAR`], or the defaults when
    /// the variable is unset.
    pub fn load() -> ConfigResult<Self> {
        match env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for library in [&self.default_library, &self.bootstrap_library] {
            if !library.is_absolute() {
                return Err(ConfigError::RelativeLibraryPath(library.clone()));
            }
        }

        if self.bootstrap_marker.is_empty() {
            return Err(ConfigError::EmptyField("bootstrap_marker"));
        }

        if self.preload_variable.is_empty() || self.preload_variable.contains('=') {
            return Err(ConfigError::InvalidPreloadVariable(self.preload_variable.clone()));
        }

        // Room for the injected entry plus the terminator
        let min_capacity = 2 * std::mem::size_of::<*const libc::c_char>();
        if self.env_capacity_bytes < min_capacity {
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.env_capacity_bytes,
                minimum: min_capacity,
            });
        }

        if self.spawn_failure_code == 0 {
            return Err(ConfigError::ZeroFailureCode);
        }

        Ok(())
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Picks the injection library for the executable at `path`.
    pub fn select_library(&self, path: &[u8]) -> &Path {
        let marker = self.bootstrap_marker.as_bytes();

        if !marker.is_empty() && path.windows(marker.len()).any(|window| window == marker) {
            &self.bootstrap_library
        } else {
            &self.default_library
        }
    }
}

static GLOBAL_CONFIG: OnceLock<SpawnConfig> = OnceLock::new();

/// Installs `config` as the process-wide configuration unless one is
/// already in place, and returns whichever is active.
pub fn set_global(config: SpawnConfig) -> &'static SpawnConfig {
    GLOBAL_CONFIG.get_or_init(|| config)
}

/// Process-wide configuration, loaded on first use.
///
/// A broken config file must not keep the hook from working, so errors fall
/// back to the defaults.
pub fn global() -> &'static SpawnConfig {
    GLOBAL_CONFIG.get_or_init(|| {
        SpawnConfig::load().unwrap_or_else(|err| {
            log::error!("Failed to load spawn hook config, using defaults: {}", err);
            SpawnConfig::default()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SpawnConfig::default();
        config.validate().unwrap();

        assert_eq!(config.env_capacity_bytes, 0x4000);
        assert_eq!(config.spawn_failure_code, 1);
        assert_eq!(config.bootstrap_marker, "xpcproxy");
        assert_eq!(config.spawn_symbol, "posix_spawn");
        assert_eq!(config.readiness_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_select_library() {
        let config = SpawnConfig::default();

        assert_eq!(
            config.select_library(b"/usr/libexec/xpcproxy"),
            config.bootstrap_library
        );
        assert_eq!(
            config.select_library(b"/Applications/Safari.app/Safari"),
            config.default_library
        );
        assert_eq!(config.select_library(b""), config.default_library);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SpawnConfig::from_json_str(
            r#"{ "default_library": "/opt/tendril/libinjector.so", "readiness_timeout_ms": 50 }"#,
        )
        .unwrap();

        assert_eq!(config.default_library, PathBuf::from("/opt/tendril/libinjector.so"));
        assert_eq!(config.readiness_timeout_ms, 50);
        assert_eq!(config.bootstrap_library, SpawnConfig::default().bootstrap_library);
    }

    #[test]
    fn test_relative_library_rejected() {
        let err = SpawnConfig::from_json_str(r#"{ "bootstrap_library": "lib/spawn_hook.so" }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::RelativeLibraryPath(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SpawnConfig::from_json_str(r#"{ "bootstrap_marker": "" }"#),
            Err(ConfigError::EmptyField("bootstrap_marker"))
        ));
        assert!(matches!(
            SpawnConfig::from_json_str(r#"{ "preload_variable": "A=B" }"#),
            Err(ConfigError::InvalidPreloadVariable(_))
        ));
        assert!(matches!(
            SpawnConfig::from_json_str(r#"{ "env_capacity_bytes": 1 }"#),
            Err(ConfigError::CapacityTooSmall { .. })
        ));
        assert!(matches!(
            SpawnConfig::from_json_str(r#"{ "spawn_failure_code": 0 }"#),
            Err(ConfigError::ZeroFailureCode)
        ));
        assert!(matches!(
            SpawnConfig::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = SpawnConfig::from_file(Path::new("/nonexistent/tendril.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
