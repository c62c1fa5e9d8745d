//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for privsh.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "privsh")]
#[command(about = "Privileged shell session manager")]
#[command(
    long_about = "Manages a single long-lived privileged shell session and dispatches commands onto it in submission order"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive privileged session
    #[command(hide = true)]
    Interactive,

    /// Run a single command through the privileged session
    Exec {
        /// Command line to execute
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Demo the session lifecycle against a mock shell (for testing)
    Demo,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Interactive
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Check if we're running in interactive mode
    pub fn is_interactive_mode(&self) -> bool {
        matches!(self.command(), Commands::Interactive)
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}
