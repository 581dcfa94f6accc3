//! Configuration file handling
//!
//! Instances are described in a TOML file, one `[[instance]]` table each:
//!
//! ```toml
//! [queue]
//! capacity = 64
//!
//! [[instance]]
//! name = "scroll-hold"
//! action = { keycode = 0x70004 }
//! release_delay_ms = 100
//! ```
//!
//! Values are resolved into [`ToggleSettings`] once at startup; nothing is
//! re-read while the instances run.

use crate::action::{ActionDescriptor, QueueSettings};
use crate::controller::{ToggleMode, ToggleSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "keytoggle";
const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_RELEASE_DELAY_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("No config directory available on this platform")]
    NoConfigDir,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            capacity: self.capacity,
        }
    }
}

/// One configured toggle instance as it appears in the file
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InstanceConfig {
    pub name: String,
    pub action: ActionDescriptor,
    #[serde(default)]
    pub release_action: Option<ActionDescriptor>,
    #[serde(default = "default_release_delay_ms")]
    pub release_delay_ms: u64,
    #[serde(default)]
    pub tap_ms: u64,
    #[serde(default)]
    pub wait_ms: u64,
    #[serde(default)]
    pub mode: ToggleMode,
}

fn default_release_delay_ms() -> u64 {
    DEFAULT_RELEASE_DELAY_MS
}

fn default_queue_capacity() -> usize {
    QueueSettings::default().capacity
}

impl InstanceConfig {
    /// Validates and converts into controller settings
    pub fn settings(&self) -> Result<ToggleSettings, ConfigError> {
        if self.release_delay_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "instance '{}': release_delay_ms must be greater than 0",
                self.name
            )));
        }

        Ok(ToggleSettings {
            release_action: self
                .release_action
                .clone()
                .unwrap_or_else(|| self.action.clone()),
            press_action: self.action.clone(),
            release_delay: Duration::from_millis(self.release_delay_ms),
            initial_press_delay: Duration::from_millis(self.tap_ms),
            post_action_delay: Duration::from_millis(self.wait_ms),
            mode: self.mode,
        })
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// `$XDG_CONFIG_HOME/keytoggle/config.toml` or the platform equivalent
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[instance]] is required".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for instance in &self.instances {
            if !names.insert(instance.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instance name '{}'",
                    instance.name
                )));
            }
            instance.settings()?;
        }

        debug!("Config validated: {} instance(s)", self.instances.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::BehaviorBinding;

    #[test]
    fn applies_defaults() {
        let config = Config::from_toml(
            r#"
            [[instance]]
            name = "scroll"
            action = { keycode = 0x70004 }
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 64);
        let settings = config.instances[0].settings().unwrap();
        assert_eq!(settings.press_action, ActionDescriptor::Keycode(0x70004));
        assert_eq!(settings.release_action, settings.press_action);
        assert_eq!(settings.release_delay, Duration::from_millis(100));
        assert_eq!(settings.initial_press_delay, Duration::ZERO);
        assert_eq!(settings.post_action_delay, Duration::ZERO);
        assert_eq!(settings.mode, ToggleMode::Hold);
    }

    #[test]
    fn reads_all_fields() {
        let config = Config::from_toml(
            r#"
            [queue]
            capacity = 8

            [[instance]]
            name = "tap"
            action = { bindings = [{ behavior = "kp", param1 = 4 }] }
            release_action = { keycode = 5 }
            release_delay_ms = 250
            tap_ms = 10
            wait_ms = 20
            mode = "tap"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.settings().capacity, 8);
        let settings = config.instances[0].settings().unwrap();
        assert_eq!(
            settings.press_action,
            ActionDescriptor::Bindings(vec![BehaviorBinding {
                behavior: "kp".into(),
                param1: 4,
                param2: 0,
            }])
        );
        assert_eq!(settings.release_action, ActionDescriptor::Keycode(5));
        assert_eq!(settings.release_delay, Duration::from_millis(250));
        assert_eq!(settings.initial_press_delay, Duration::from_millis(10));
        assert_eq!(settings.post_action_delay, Duration::from_millis(20));
        assert_eq!(settings.mode, ToggleMode::Tap);
    }

    #[test]
    fn rejects_zero_release_delay() {
        let err = Config::from_toml(
            r#"
            [[instance]]
            name = "bad"
            action = { keycode = 1 }
            release_delay_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_duplicate_names_and_empty_config() {
        let err = Config::from_toml(
            r#"
            [[instance]]
            name = "a"
            action = { keycode = 1 }

            [[instance]]
            name = "a"
            action = { keycode = 2 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        assert!(matches!(
            Config::from_toml("").unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn reports_parse_errors() {
        let err = Config::from_toml("[[instance]]\nname = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
