//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::shell::types::OpenOptions;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Privileged shell configuration
    pub shell: ShellConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Escalation program used to open the privileged shell
    pub program: String,

    /// Arguments passed to the escalation program
    pub args: Vec<String>,

    /// Capture stderr lines into command output
    pub want_stderr: bool,

    /// Seconds of inactivity before a busy channel is force-killed
    pub watchdog_timeout_seconds: u64,

    /// Suppress per-line debug logging of shell output
    pub minimal_logging: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Absolute or relative path to the log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log: LogConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "su".to_string(),
            args: Vec::new(),
            want_stderr: true,
            watchdog_timeout_seconds: 10,
            minimal_logging: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/privsh.log".to_string(),
        }
    }
}

impl ShellConfig {
    /// Channel-open options derived from this section
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            want_stderr: self.want_stderr,
            watchdog_timeout_seconds: self.watchdog_timeout_seconds,
            minimal_logging: self.minimal_logging,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // PRIVSH_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("PRIVSH_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // PRIVSH_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("PRIVSH_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // PRIVSH_SHELL_PROGRAM - escalation program
        if let Ok(program) = env::var("PRIVSH_SHELL_PROGRAM") {
            if !program.trim().is_empty() {
                self.shell.program = program;
            }
        }

        // PRIVSH_SHELL_ARGS - whitespace-separated escalation arguments
        if let Ok(args) = env::var("PRIVSH_SHELL_ARGS") {
            self.shell.args = args
                .split_whitespace()
                .map(|s| s.to_string())
                .collect();
        }

        // PRIVSH_WANT_STDERR - capture stderr
        if let Ok(want_stderr) = env::var("PRIVSH_WANT_STDERR") {
            self.shell.want_stderr = want_stderr.parse().unwrap_or(self.shell.want_stderr);
        }

        // PRIVSH_WATCHDOG_TIMEOUT_SECONDS - watchdog ceiling
        if let Ok(timeout) = env::var("PRIVSH_WATCHDOG_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.shell.watchdog_timeout_seconds = value;
            }
        }

        // PRIVSH_MINIMAL_LOGGING - suppress per-line output logging
        if let Ok(minimal) = env::var("PRIVSH_MINIMAL_LOGGING") {
            self.shell.minimal_logging = minimal.parse().unwrap_or(self.shell.minimal_logging);
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.shell.program.trim().is_empty() {
            anyhow::bail!("Escalation program must not be empty");
        }

        if self.shell.watchdog_timeout_seconds == 0 {
            anyhow::bail!("Watchdog timeout must be greater than 0");
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{:#?}", self);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  privsh config show    - Show current configuration");
        println!("  privsh config set <key> <value> - Set configuration value");
        println!("  privsh config reset   - Reset to default configuration");
        Ok(())
    }

    /// Set a single value by dotted key
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "log_level" => self.log_level = value.to_string(),
            "log.file_path" => self.log.file_path = value.to_string(),
            "shell.program" => self.shell.program = value.to_string(),
            "shell.args" => {
                self.shell.args = value.split_whitespace().map(|s| s.to_string()).collect();
            }
            "shell.want_stderr" => {
                self.shell.want_stderr = value
                    .parse()
                    .with_context(|| format!("Invalid boolean: {}", value))?;
            }
            "shell.watchdog_timeout_seconds" => {
                self.shell.watchdog_timeout_seconds = value
                    .parse()
                    .with_context(|| format!("Invalid integer: {}", value))?;
            }
            "shell.minimal_logging" => {
                self.shell.minimal_logging = value
                    .parse()
                    .with_context(|| format!("Invalid boolean: {}", value))?;
            }
            other => anyhow::bail!("Unsupported config key: {}", other),
        }
        self.validate()
    }

    /// Handle configuration command
    pub fn handle_command(action: &Option<crate::cli::ConfigAction>, path: &str) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load_or_default(path);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Set { key, value }) => {
                let mut config = Config::load_or_default(path);
                config.set_value(key, value)?;
                config.save_to_file(path)?;
                println!("Updated {} = {}", key, value);
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let config = Config::default();
                config.save_to_file(path)?;
                config.display()?;
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shell.program, "su");
        assert_eq!(config.shell.watchdog_timeout_seconds, 10);
        assert!(config.shell.want_stderr);
    }

    #[test]
    fn test_open_options_mirror_shell_section() {
        let mut config = Config::default();
        config.shell.watchdog_timeout_seconds = 3;
        config.shell.minimal_logging = false;

        let options = config.shell.open_options();
        assert_eq!(options.watchdog_timeout_seconds, 3);
        assert!(!options.minimal_logging);
        assert!(options.want_stderr);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.shell, deserialized.shell);
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // Test save
        config.save_to_file(temp_file.path()).unwrap();

        // Test load
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.shell, loaded_config.shell);
    }

    #[test]
    fn test_validate_rejects_zero_watchdog() {
        let mut config = Config::default();
        config.shell.watchdog_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_value_by_dotted_key() {
        let mut config = Config::default();
        config.set_value("shell.program", "sudo").unwrap();
        config.set_value("shell.args", "-n -s").unwrap();
        config.set_value("shell.watchdog_timeout_seconds", "30").unwrap();

        assert_eq!(config.shell.program, "sudo");
        assert_eq!(config.shell.args, vec!["-n", "-s"]);
        assert_eq!(config.shell.watchdog_timeout_seconds, 30);

        assert!(config.set_value("shell.watchdog_timeout_seconds", "abc").is_err());
        assert!(config.set_value("nope", "x").is_err());
    }
}
