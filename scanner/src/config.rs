//! YAML Profile for the Scanner
//!
//! Optional device profile loaded with `--config`; command line flags
//! override anything set here.

use serde::{Deserialize, Serialize};

/// Top-level profile structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScannerConfig {
    /// Radio device settings
    #[serde(default)]
    pub radio: RadioProfile,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Radio device settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadioProfile {
    /// Device URI (e.g. ip:192.168.2.1 or sim:)
    #[serde(default = "default_uri")]
    pub uri: String,
    /// Receive gain in dB
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Centre frequency in Hz
    pub frequency: Option<f64>,
}

impl Default for RadioProfile {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            gain: default_gain(),
            frequency: None,
        }
    }
}

fn default_uri() -> String {
    "sim:".to_string()
}

fn default_gain() -> f32 {
    40.0
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ScannerConfig {
    /// Load a profile from a YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ScannerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ScannerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.radio.uri, "sim:");
        assert_eq!(config.radio.gain, 40.0);
        assert!(config.radio.frequency.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_full_profile() {
        let yaml = r#"
radio:
  uri: "ip:192.168.2.1"
  gain: 55.0
  frequency: 935.2e6
log:
  level: debug
"#;
        let config: ScannerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.radio.uri, "ip:192.168.2.1");
        assert_eq!(config.radio.gain, 55.0);
        assert_eq!(config.radio.frequency, Some(935.2e6));
        assert_eq!(config.log.level, "debug");
    }
}
