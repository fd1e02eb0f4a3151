//! Configuration handling for the capadis service.
//!
//! Values come from the shared YAML config file, then environment
//! variables, then command line flags (applied in main).

use anyhow::{bail, Context, Result};
use capadis_session::SessionConfig;
use capadis_wire::{CarryOverPolicy, PipelineConfig, DEFAULT_MAX_CARRY_OVER, FRAME_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const KEY_PREFIX: &str = "services.capadis.";

/// Capadis service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapadisConfig {
    /// Controllers to dial
    pub connect: Vec<SocketAddr>,
    /// Address to accept controller connections on
    pub listen: Option<SocketAddr>,
    /// Carry-over bound per connection
    pub max_carry_over: usize,
    /// Pending fragment handling on a newer header
    pub carry_over_policy: CarryOverPolicy,
    /// Reject frames whose timestamp is not a real date and time
    pub strict_timestamps: bool,
    /// Bytes reserved per socket read
    pub read_buffer_size: usize,
    /// First reconnect delay
    pub initial_backoff: Duration,
    /// Reconnect delay cap
    pub max_backoff: Duration,
}

impl Default for CapadisConfig {
    fn default() -> Self {
        Self {
            connect: Vec::new(),
            listen: None,
            max_carry_over: DEFAULT_MAX_CARRY_OVER,
            carry_over_policy: CarryOverPolicy::Replace,
            strict_timestamps: false,
            read_buffer_size: 4 * 1024,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    capadis: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

impl CapadisConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config)?;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", config_path.as_ref()),
        }

        config.apply_overrides_from(|name| std::env::var(name).ok())?;
        config.validate()?;

        info!(
            "Final capadis configuration: connect={:?}, listen={:?}, max_carry_over={}, policy={:?}, strict_timestamps={}",
            config.connect,
            config.listen,
            config.max_carry_over,
            config.carry_over_policy,
            config.strict_timestamps
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) -> Result<()> {
        let values = root_config
            .services
            .and_then(|services| services.capadis)
            .and_then(|service| service.config);

        if let Some(values) = values {
            for (key, value) in values {
                match key.strip_prefix(KEY_PREFIX) {
                    Some(name) => self
                        .set(name, &value)
                        .with_context(|| format!("invalid value for {}", key))?,
                    None => warn!("Ignoring configuration key outside {}*: {}", KEY_PREFIX, key),
                }
            }
        }

        Ok(())
    }

    /// Apply `CAPADIS_*` overrides looked up through `lookup`
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        const OVERRIDES: [(&str, &str); 5] = [
            ("CAPADIS_CONNECT", "connect"),
            ("CAPADIS_LISTEN", "listen"),
            ("CAPADIS_MAX_CARRY_OVER", "max_carry_over"),
            ("CAPADIS_CARRY_OVER_POLICY", "carry_over_policy"),
            ("CAPADIS_STRICT_TIMESTAMPS", "strict_timestamps"),
        ];

        for (var, name) in OVERRIDES {
            if let Some(value) = lookup(var) {
                self.set(name, &value)
                    .with_context(|| format!("invalid value in {}", var))?;
                info!("{} overridden by environment: {}", name, value);
            }
        }

        Ok(())
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match name {
            "connect" => {
                self.connect = value
                    .split(',')
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .map(|addr| addr.parse::<SocketAddr>())
                    .collect::<Result<_, _>>()?;
            }
            "listen" => {
                self.listen = if value.is_empty() {
                    None
                } else {
                    Some(value.parse()?)
                };
            }
            "max_carry_over" => self.max_carry_over = value.parse()?,
            "carry_over_policy" => {
                self.carry_over_policy = value.parse().map_err(anyhow::Error::msg)?;
            }
            "strict_timestamps" => self.strict_timestamps = value.parse()?,
            "read_buffer_size" => self.read_buffer_size = value.parse()?,
            "initial_backoff" => self.initial_backoff = humantime::parse_duration(value)?,
            "max_backoff" => self.max_backoff = humantime::parse_duration(value)?,
            _ => warn!("Ignoring unknown configuration key: {}{}", KEY_PREFIX, name),
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_carry_over < FRAME_LEN {
            bail!(
                "max_carry_over must be at least {} bytes, got {}",
                FRAME_LEN,
                self.max_carry_over
            );
        }
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be greater than zero");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than zero");
        }
        Ok(())
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            pipeline: PipelineConfig {
                max_carry_over: self.max_carry_over,
                carry_over_policy: self.carry_over_policy,
                strict_timestamps: self.strict_timestamps,
            },
            read_buffer_size: self.read_buffer_size,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = CapadisConfig::default();
        assert!(config.connect.is_empty());
        assert_eq!(config.listen, None);
        assert_eq!(config.max_carry_over, 4096);
        assert_eq!(config.carry_over_policy, CarryOverPolicy::Replace);
        assert!(!config.strict_timestamps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = write_config(
            r#"
services:
  capadis:
    enabled: true
    executable: ./capadis
    config:
      services.capadis.connect: "192.168.1.23:8888, 192.168.1.24:8888"
      services.capadis.max_carry_over: "256"
      services.capadis.carry_over_policy: "flush"
      services.capadis.strict_timestamps: "true"
      services.capadis.max_backoff: "10s"
"#,
        );

        let config = CapadisConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.connect.len(), 2);
        assert_eq!(config.connect[1], "192.168.1.24:8888".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_carry_over, 256);
        assert_eq!(config.carry_over_policy, CarryOverPolicy::Flush);
        assert!(config.strict_timestamps);
        assert_eq!(config.max_backoff, Duration::from_secs(10));
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        let temp_file = write_config(
            r#"
services:
  capadis:
    config:
      services.capadis.carry_over_policy: "keep"
"#,
        );
        assert!(CapadisConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_small_carry_over_is_an_error() {
        let temp_file = write_config(
            r#"
services:
  capadis:
    config:
      services.capadis.max_carry_over: "9"
"#,
        );
        let err = CapadisConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("max_carry_over"));
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let temp_file = write_config("services: [not, a, map");
        let config = CapadisConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.max_carry_over, DEFAULT_MAX_CARRY_OVER);
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = CapadisConfig::default();
        config
            .apply_overrides_from(|name| match name {
                "CAPADIS_LISTEN" => Some("0.0.0.0:8888".to_string()),
                "CAPADIS_CARRY_OVER_POLICY" => Some("FLUSH".to_string()),
                "CAPADIS_STRICT_TIMESTAMPS" => Some("true".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.listen, "0.0.0.0:8888".parse::<SocketAddr>().ok());
        assert_eq!(config.carry_over_policy, CarryOverPolicy::Flush);
        assert!(config.strict_timestamps);
        assert!(config.connect.is_empty());
    }

    #[test]
    fn test_bad_environment_value() {
        let mut config = CapadisConfig::default();
        let result = config.apply_overrides_from(|name| {
            (name == "CAPADIS_MAX_CARRY_OVER").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_session_config() {
        let config = CapadisConfig {
            max_carry_over: 64,
            strict_timestamps: true,
            ..CapadisConfig::default()
        };
        let session = config.session_config();
        assert_eq!(session.pipeline.max_carry_over, 64);
        assert!(session.pipeline.strict_timestamps);
        assert_eq!(session.read_buffer_size, 4096);
    }
}
