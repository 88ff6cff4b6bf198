use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Result, WwandError};

/// Main configuration structure for wwand.
///
/// Tunables for the modem service. Everything has a sensible default so an
/// embedding application can run without any configuration file at all.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Modem service settings.
    #[serde(default)]
    pub modem: ModemConfig,
}

/// Modem service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Timeout in seconds applied to individual transport commands.
    ///
    /// This is the short per-command timeout; the dial confirmation wait
    /// uses its own fixed timeout owned by the bearer state machine.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Capacity of the service event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Substrings matched against port names to skip during registration.
    #[serde(default)]
    pub ignored_ports: Vec<String>,
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            event_channel_capacity: default_event_capacity(),
            ignored_ports: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or fails to parse.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| WwandError::toml_parse(e, Some(path)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let config = Config::default();
        assert_eq!(config.modem.command_timeout_secs, 10);
        assert_eq!(config.modem.event_channel_capacity, 256);
        assert!(config.modem.ignored_ports.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [modem]
            command_timeout_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.modem.command_timeout_secs, 3);
        assert_eq!(config.modem.event_channel_capacity, 256);
    }

    #[test]
    fn load_reports_parse_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[modem\ncommand_timeout_secs = 3").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(WwandError::TomlParse(_))));
    }
}
