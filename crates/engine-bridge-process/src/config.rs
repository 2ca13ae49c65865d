//! Engine launch configuration.

use std::{
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{command::EngineCommand, locate::merge_paths};

/// Command line that starts the engine and its protocol adapter.
pub const DEFAULT_ENGINE_COMMAND: &str = "matlab -nodesktop -nosplash -batch engine_bridge_serve";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid engine configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How to start an engine process.
///
/// ```toml
/// command = "/usr/local/MATLAB/R2025a/bin/matlab -nodesktop -nosplash -batch engine_bridge_serve"
/// search_dirs = ["/opt/engines/bin"]
///
/// [env]
/// MATLAB_LOG_DIR = "/tmp/engine-logs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine command line, split with shell rules.
    pub command: String,
    /// Extra directories searched for the engine executable.
    pub search_dirs: Vec<PathBuf>,
    /// Extra environment variables for the engine process.
    pub env: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            search_dirs: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid configuration.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// `engine-bridge/engine.toml` under the user's config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("engine-bridge").join("engine.toml"))
    }

    /// Load `path` if given, else the file at [`EngineConfig::default_path`]
    /// if it exists, else the defaults.
    ///
    /// # Errors
    /// Returns error if a file is found but cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Put `dir` in front of the path list in environment variable `var`.
    ///
    /// The engine sees the configured value if there is one, otherwise the
    /// value inherited from this process.
    #[must_use]
    pub fn with_path_entry(mut self, var: &str, dir: impl AsRef<Path>) -> Self {
        let current = self
            .env
            .get(var)
            .map(OsString::from)
            .or_else(|| std::env::var_os(var))
            .unwrap_or_default();
        let merged = merge_paths(dir.as_ref(), current);
        self.env
            .insert(var.to_string(), merged.to_string_lossy().into_owned());
        self
    }

    /// Command builder for the configured command line.
    #[must_use]
    pub fn engine_command(&self) -> EngineCommand {
        EngineCommand::new(self.command.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.engine_command().program_name().as_deref(), Some("matlab"));
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            command = "/opt/MATLAB/R2025a/bin/matlab -batch serve"
            search_dirs = ["/opt/engines/bin"]

            [env]
            MATLAB_LOG_DIR = "/tmp/engine-logs"
            "#,
        )
        .unwrap();
        assert_eq!(config.search_dirs, vec![PathBuf::from("/opt/engines/bin")]);
        assert_eq!(config.env["MATLAB_LOG_DIR"], "/tmp/engine-logs");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = EngineConfig::from_toml_str("search_dirs = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("engine.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "command = \"octave --eval serve\"\n").unwrap();

        let config = EngineConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.command, "octave --eval serve");
        assert!(config.search_dirs.is_empty());
    }

    #[test]
    fn test_path_entry_goes_first() {
        let mut config = EngineConfig::default();
        config
            .env
            .insert("MATLABPATH".into(), "/opt/toolboxes".into());

        let config = config.with_path_entry("MATLABPATH", "/srv/adapter");
        let entries: Vec<PathBuf> =
            std::env::split_paths(&config.env["MATLABPATH"]).collect();
        assert_eq!(
            entries,
            vec![PathBuf::from("/srv/adapter"), PathBuf::from("/opt/toolboxes")]
        );

        // Already present: not duplicated.
        let config = config.with_path_entry("MATLABPATH", "/opt/toolboxes");
        assert_eq!(std::env::split_paths(&config.env["MATLABPATH"]).count(), 2);
    }
}
