//! Configuration management for aprscan
//!
//! Configuration is loaded from `./config/aprscan.toml` (or `--config`).
//! The template embedded below is the single source of defaults.

use serde::Deserialize;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/aprscan.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/aprscan.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be greater than zero")]
    ZeroValue { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub browser: BrowserConfig,
    pub settle: SettleConfig,
    pub selectors: SelectorsConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub url: String,
    pub state: String,
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub verify_login: bool,
}

impl PortalConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Browser engine launch settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,
    pub user_agent: String,
    pub startup_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub chrome_path: Option<String>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

fn default_headless() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_window_width() -> u32 {
    1366
}

fn default_window_height() -> u32 {
    900
}

/// Minimum settle bounds, in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct SettleConfig {
    pub post_navigation_ms: u64,
    pub post_login_ms: u64,
    pub post_filter_ms: u64,
    pub autocomplete_step_ms: u64,
    pub autocomplete_confirm_ms: u64,
}

impl SettleConfig {
    pub fn post_navigation(&self) -> Duration {
        Duration::from_millis(self.post_navigation_ms)
    }

    pub fn post_login(&self) -> Duration {
        Duration::from_millis(self.post_login_ms)
    }

    pub fn post_filter(&self) -> Duration {
        Duration::from_millis(self.post_filter_ms)
    }

    pub fn autocomplete_step(&self) -> Duration {
        Duration::from_millis(self.autocomplete_step_ms)
    }

    pub fn autocomplete_confirm(&self) -> Duration {
        Duration::from_millis(self.autocomplete_confirm_ms)
    }
}

/// Element locators for the fixed portal page structure
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorsConfig {
    pub username_id: String,
    pub password_id: String,
    pub submit_xpath: String,
    pub state_field_id: String,
    pub distributor_field_id: String,
    pub search_field_id: String,
    pub filter_button_xpath: String,
    pub result_row_css: String,
    pub logged_in_marker_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_column_marker")]
    pub column_marker: String,
}

fn default_column_marker() -> String {
    "PROJETOS.PY".to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            column_marker: default_column_marker(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
}

fn default_checkpoint_enabled() -> bool {
    true
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded template, parsed
    pub fn default_config() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.portal.url;
        if url.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "portal.url".to_string(),
            });
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::InvalidUrl {
                field: "portal.url".to_string(),
                url: url.clone(),
            });
        }

        let required = [
            ("portal.state", &self.portal.state),
            ("browser.user_agent", &self.browser.user_agent),
            ("selectors.username_id", &self.selectors.username_id),
            ("selectors.password_id", &self.selectors.password_id),
            ("selectors.submit_xpath", &self.selectors.submit_xpath),
            ("selectors.state_field_id", &self.selectors.state_field_id),
            ("selectors.distributor_field_id", &self.selectors.distributor_field_id),
            ("selectors.search_field_id", &self.selectors.search_field_id),
            ("selectors.filter_button_xpath", &self.selectors.filter_button_xpath),
            ("selectors.result_row_css", &self.selectors.result_row_css),
            ("selectors.logged_in_marker_id", &self.selectors.logged_in_marker_id),
            ("input.column_marker", &self.input.column_marker),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: field.to_string(),
                });
            }
        }

        let positive = [
            ("portal.wait_timeout_secs", self.portal.wait_timeout_secs),
            ("portal.poll_interval_ms", self.portal.poll_interval_ms),
            ("browser.startup_timeout_secs", self.browser.startup_timeout_secs),
            ("browser.idle_timeout_secs", self.browser.idle_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::ZeroValue {
                    field: field.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        io::stdin().is_terminal()
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config() -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config()?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
