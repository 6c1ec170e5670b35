//! Configuration types and loading for askpass-agent.
//!
//! Configuration is loaded from `~/.config/askpass-agent/config.toml`.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [watch]
//! directory = "/run/user/1000/systemd/ask-password"
//!
//! [prompt]
//! program = "ssh-askpass"
//! args = ["--title", "Password"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Directory below the runtime directory where requesters drop `ask.*` files.
pub const ASK_PASSWORD_SUBDIR: &str = "systemd/ask-password";

/// Prompt program spawned when none is configured.
pub const DEFAULT_PROMPT_PROGRAM: &str = "askpass-prompt";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// No directory was configured and `XDG_RUNTIME_DIR` is unset.
    #[error("XDG_RUNTIME_DIR is not set and no watch directory is configured")]
    RuntimeDirectoryUnset,
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory watch configuration.
    pub watch: WatchConfig,
    /// Prompt program configuration.
    pub prompt: PromptConfig,
}

/// Configuration for the directory watch.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory to watch. Defaults to `$XDG_RUNTIME_DIR/systemd/ask-password`.
    pub directory: Option<PathBuf>,
}

/// Configuration for the prompt program.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Program to run per request (default: `askpass-prompt`).
    pub program: String,
    /// Extra arguments placed before the message.
    pub args: Vec<String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROMPT_PROGRAM.to_string(),
            args: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.config/askpass-agent/config.toml` using `dirs::config_dir()`,
    /// or `None` if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("askpass-agent").join("config.toml"))
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The directory to watch for request files.
    pub fn watch_directory(&self) -> Result<PathBuf, ConfigError> {
        self.watch_directory_in(dirs::runtime_dir())
    }

    fn watch_directory_in(&self, runtime_dir: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(directory) = &self.watch.directory {
            return Ok(directory.clone());
        }
        runtime_dir
            .map(|dir| dir.join(ASK_PASSWORD_SUBDIR))
            .ok_or(ConfigError::RuntimeDirectoryUnset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_values() {
        let config = Config::default();

        assert!(config.watch.directory.is_none());
        assert_eq!(config.prompt.program, "askpass-prompt");
        assert!(config.prompt.args.is_empty());
    }

    #[test]
    fn load_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[watch]
directory = "/tmp/ask"

[prompt]
program = "ssh-askpass"
args = ["--title", "Password"]
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).expect("Should parse");

        assert_eq!(config.watch.directory, Some(PathBuf::from("/tmp/ask")));
        assert_eq!(config.prompt.program, "ssh-askpass");
        assert_eq!(config.prompt.args, vec!["--title", "Password"]);
    }

    #[test]
    fn load_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[prompt]
args = ["-q"]
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).expect("Should parse");

        assert_eq!(config.prompt.program, DEFAULT_PROMPT_PROGRAM);
        assert_eq!(config.prompt.args, vec!["-q"]);
        assert!(config.watch.directory.is_none());
    }

    #[test]
    fn load_invalid_config_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let result = Config::load_from(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn load_wrong_type_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[prompt]\nargs = \"not a list\"").unwrap();

        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = Config::load_from(Path::new("/nonexistent/askpass-agent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_empty_config_returns_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::load_from(file.path()).expect("Should parse empty file");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn watch_directory_under_runtime_dir() {
        let config = Config::default();
        let dir = config
            .watch_directory_in(Some(PathBuf::from("/run/user/1000")))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/run/user/1000/systemd/ask-password"));
    }

    #[test]
    fn watch_directory_prefers_configured() {
        let config = Config {
            watch: WatchConfig {
                directory: Some(PathBuf::from("/srv/ask")),
            },
            ..Config::default()
        };
        assert_eq!(
            config.watch_directory_in(None).unwrap(),
            PathBuf::from("/srv/ask")
        );
    }

    #[test]
    fn watch_directory_requires_runtime_dir() {
        let result = Config::default().watch_directory_in(None);
        assert!(matches!(result, Err(ConfigError::RuntimeDirectoryUnset)));
    }

    #[test]
    fn default_path_returns_config_dir() {
        let path = Config::default_path();
        assert!(path.is_some());
        assert!(path.unwrap().ends_with("askpass-agent/config.toml"));
    }
}
