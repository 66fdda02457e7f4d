//! Store options
//!
//! Options are resolved from:
//! 1. Default values
//! 2. A TOML document (file or string)
//! 3. Environment variables (VESSEL_* prefix)
//!
//! Environment variables take precedence over TOML values. Builder calls on
//! [`StoreBuilder`](crate::StoreBuilder) take precedence over all of them.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "VESSEL";

/// Behavioural options fixed when a store is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Permit committing an empty or absent value
    #[serde(default)]
    pub allow_undefined_data: bool,

    /// Run the load function while the store is being built
    #[serde(default = "default_load_on_create")]
    pub load_on_create: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            allow_undefined_data: false,
            load_on_create: default_load_on_create(),
        }
    }
}

impl StoreOptions {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env_overrides();
        options
    }

    /// Load options from a TOML file
    ///
    /// A missing file yields the defaults. Environment variables are still
    /// applied as overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::from_env());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read options file: {:?}", path))?;
        Self::load_from_str(&content)
            .with_context(|| format!("Failed to parse options file: {:?}", path))
    }

    /// Load options from a TOML string
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut options: StoreOptions =
            toml::from_str(toml_content).context("Failed to parse store options TOML")?;
        options.apply_env_overrides();
        Ok(options)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // VESSEL_ALLOW_UNDEFINED_DATA
        if let Some(val) = env_flag("ALLOW_UNDEFINED_DATA") {
            self.allow_undefined_data = val;
        }

        // VESSEL_LOAD_ON_CREATE
        if let Some(val) = env_flag("LOAD_ON_CREATE") {
            self.load_on_create = val;
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name))
        .ok()
        .map(|val| val.eq_ignore_ascii_case("true") || val == "1")
}

fn default_load_on_create() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &["VESSEL_ALLOW_UNDEFINED_DATA", "VESSEL_LOAD_ON_CREATE"];

    #[test]
    fn test_default_options() {
        let options = StoreOptions::default();
        assert!(!options.allow_undefined_data);
        assert!(options.load_on_create);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let options = StoreOptions::load_from_str("").unwrap();
        assert_eq!(options, StoreOptions::default());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            allow_undefined_data = true
            load_on_create = false
        "#;

        let options = StoreOptions::load_from_str(toml).unwrap();
        assert!(options.allow_undefined_data);
        assert!(!options.load_on_create);
    }

    #[test]
    fn test_env_overrides_toml() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("VESSEL_LOAD_ON_CREATE", "false");
        env::set_var("VESSEL_ALLOW_UNDEFINED_DATA", "1");

        let options = StoreOptions::load_from_str("load_on_create = true").unwrap();
        assert!(!options.load_on_create);
        assert!(options.allow_undefined_data);
    }

    #[test]
    fn test_from_env() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert_eq!(StoreOptions::from_env(), StoreOptions::default());

        env::set_var("VESSEL_ALLOW_UNDEFINED_DATA", "TRUE");
        assert!(StoreOptions::from_env().allow_undefined_data);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let options = StoreOptions::load_from_path(Path::new("/nonexistent/options.toml")).unwrap();
        assert_eq!(options, StoreOptions::default());
    }

    #[test]
    fn test_load_from_path() {
        let _guard = EnvGuard::new(ENV_VARS);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("options.toml");
        std::fs::write(&path, "allow_undefined_data = true\n").unwrap();

        let options = StoreOptions::load_from_path(&path).unwrap();
        assert!(options.allow_undefined_data);
        assert!(options.load_on_create);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let _guard = EnvGuard::new(ENV_VARS);

        let err = StoreOptions::load_from_str("load_on_create = \"maybe\"").unwrap_err();
        assert!(err.to_string().contains("store options"));
    }
}
