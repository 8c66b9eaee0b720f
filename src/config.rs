//! Configuration.
//!
//! # Loading priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `TU_CONFIG` environment variable
//! 3. Default: `<config_dir>/tu/config.toml`
//! 4. Built-in defaults
//!
//! Individual paths and the interpreter can then be overridden by
//! `TU_REGISTRY_FILE`, `TU_HISTORY_FILE` and `TU_PYTHON`; CLI flags win over all.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RouterError};
use crate::exec::{CallableTimeoutPolicy, DEFAULT_PYTHON, ExecOptions};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::resolve::DEFAULT_SUGGESTIONS;

pub const ENV_CONFIG: &str = "TU_CONFIG";
pub const ENV_REGISTRY: &str = "TU_REGISTRY_FILE";
pub const ENV_HISTORY: &str = "TU_HISTORY_FILE";
pub const ENV_PYTHON: &str = "TU_PYTHON";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub registry_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub history_limit: Option<usize>,
    pub record_history: Option<bool>,
    pub python: Option<String>,
    pub suggestions: Option<usize>,
    pub callable_timeout: Option<CallableTimeoutPolicy>,
}

/// Effective settings after every layer is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub registry_path: PathBuf,
    pub history_path: PathBuf,
    pub history_limit: usize,
    pub record_history: bool,
    pub python: String,
    pub suggestions: usize,
    pub callable_timeout: CallableTimeoutPolicy,
    /// The config file that was read, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Load from the real environment.
    pub fn load(explicit_config: Option<&Path>, registry_override: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit_config, registry_override, |key| std::env::var(key).ok())
    }

    /// Same as [`Settings::load`] with an injectable environment lookup.
    pub fn load_with<E>(explicit_config: Option<&Path>, registry_override: Option<&Path>, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config_path = explicit_config
            .map(Path::to_path_buf)
            .or_else(|| env(ENV_CONFIG).filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(default_config_path);

        let (file, source) = match &config_path {
            Some(path) => match read_config(path, explicit_config.is_some())? {
                Some(file) => (file, Some(path.clone())),
                None => (ConfigFile::default(), None),
            },
            None => (ConfigFile::default(), None),
        };

        let env_path = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let registry_path = registry_override
            .map(Path::to_path_buf)
            .or_else(|| env_path(ENV_REGISTRY))
            .or(file.registry_path)
            .or_else(default_registry_path)
            .ok_or_else(|| RouterError::Config("cannot determine a registry location; set TU_REGISTRY_FILE".into()))?;
        let history_path = env_path(ENV_HISTORY)
            .or(file.history_path)
            .or_else(default_history_path)
            .ok_or_else(|| RouterError::Config("cannot determine a history location; set TU_HISTORY_FILE".into()))?;

        let settings = Settings {
            registry_path,
            history_path,
            history_limit: file.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            record_history: file.record_history.unwrap_or(true),
            python: env(ENV_PYTHON)
                .filter(|v| !v.is_empty())
                .or(file.python)
                .unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            suggestions: file.suggestions.unwrap_or(DEFAULT_SUGGESTIONS),
            callable_timeout: file.callable_timeout.unwrap_or_default(),
            source,
        };
        debug!(?settings, "settings resolved");
        Ok(settings)
    }

    /// Executor options implied by these settings.
    pub fn exec_options(&self, dry_run: bool) -> ExecOptions {
        ExecOptions {
            dry_run,
            capture: false,
            python: self.python.clone(),
            callable_timeout: self.callable_timeout,
        }
    }
}

/// `None` when the file does not exist and was not explicitly requested.
fn read_config(path: &Path, explicit: bool) -> Result<Option<ConfigFile>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => return Ok(None),
        Err(e) => {
            return Err(RouterError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| RouterError::Config(format!("{}: {e}", path.display())))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tu").join("config.toml"))
}

pub fn default_registry_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tu").join("registry.json"))
}

pub fn default_history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("tu").join("history.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn file_values_apply() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.toml");
        fs::write(
            &cfg,
            r#"
registry_path = "/data/reg.json"
history_limit = 50
record_history = false
python = "pypy3"
suggestions = 2
callable_timeout = "enforce"
"#,
        )
        .unwrap();
        let s = Settings::load_with(Some(&cfg), None, env_of(&[])).unwrap();
        assert_eq!(s.registry_path, PathBuf::from("/data/reg.json"));
        assert_eq!(s.history_limit, 50);
        assert!(!s.record_history);
        assert_eq!(s.python, "pypy3");
        assert_eq!(s.suggestions, 2);
        assert_eq!(s.callable_timeout, CallableTimeoutPolicy::Enforce);
        assert_eq!(s.source.as_deref(), Some(cfg.as_path()));
    }

    #[test]
    fn env_beats_file_and_flag_beats_env() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.toml");
        fs::write(&cfg, "registry_path = \"/file.json\"\npython = \"py-file\"\n").unwrap();
        let env = env_of(&[
            (ENV_CONFIG, cfg.to_str().unwrap()),
            (ENV_REGISTRY, "/env.json"),
            (ENV_PYTHON, "py-env"),
        ]);
        let s = Settings::load_with(None, None, &env).unwrap();
        assert_eq!(s.registry_path, PathBuf::from("/env.json"));
        assert_eq!(s.python, "py-env");

        let s = Settings::load_with(None, Some(Path::new("/flag.json")), &env).unwrap();
        assert_eq!(s.registry_path, PathBuf::from("/flag.json"));
    }

    #[test]
    fn missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("nope.toml");
        let env = env_of(&[
            (ENV_CONFIG, absent.to_str().unwrap()),
            (ENV_REGISTRY, "/r.json"),
            (ENV_HISTORY, "/h.json"),
        ]);
        let s = Settings::load_with(None, None, env).unwrap();
        assert_eq!(s.history_limit, DEFAULT_HISTORY_LIMIT);
        assert!(s.record_history);
        assert_eq!(s.python, DEFAULT_PYTHON);
        assert!(s.source.is_none());
    }

    #[test]
    fn explicit_missing_or_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("nope.toml");
        assert!(matches!(
            Settings::load_with(Some(&absent), None, env_of(&[])),
            Err(RouterError::Config(_))
        ));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "history_limit = \"lots\"").unwrap();
        let err = Settings::load_with(Some(&bad), None, env_of(&[])).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_STORAGE);
    }
}
