use eap_proto::EapType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::authority::AuthVectors;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Statically provisioned subscriber (lab/test credential authority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Lookup key: IMSI for permanent identities, or the verbatim user part
    pub imsi: String,
    #[serde(default)]
    pub msisdn: Option<String>,
    /// 16 bytes, hex
    pub rand: String,
    /// 16 bytes, hex
    pub autn: String,
    /// 4 to 16 bytes, hex
    pub xres: String,
    /// 16 bytes, hex
    pub ck: String,
    /// 16 bytes, hex
    pub ik: String,
}

impl SubscriberConfig {
    /// Decode the hex fields into an authentication vector
    pub fn to_vectors(&self) -> Result<AuthVectors, ConfigError> {
        let xres = decode_hex(&self.imsi, "xres", &self.xres)?;
        if xres.len() < 4 || xres.len() > 16 {
            return Err(ConfigError::Invalid(format!(
                "Subscriber {}: xres must be 4 to 16 bytes, got {}",
                self.imsi,
                xres.len()
            )));
        }

        Ok(AuthVectors {
            rand: decode_fixed(&self.imsi, "rand", &self.rand)?,
            autn: decode_fixed(&self.imsi, "autn", &self.autn)?,
            xres,
            ck: decode_fixed(&self.imsi, "ck", &self.ck)?,
            ik: decode_fixed(&self.imsi, "ik", &self.ik)?,
            msisdn: self.msisdn.clone(),
        })
    }
}

fn decode_hex(imsi: &str, field: &str, value: &str) -> Result<Vec<u8>, ConfigError> {
    hex::decode(value).map_err(|e| {
        ConfigError::Invalid(format!("Subscriber {}: invalid hex in {}: {}", imsi, field, e))
    })
}

fn decode_fixed(imsi: &str, field: &str, value: &str) -> Result<[u8; 16], ConfigError> {
    let bytes = decode_hex(imsi, field, value)?;
    bytes.as_slice().try_into().map_err(|_| {
        ConfigError::Invalid(format!(
            "Subscriber {}: {} must be 16 bytes, got {}",
            imsi,
            field,
            bytes.len()
        ))
    })
}

/// EAP-AKA method settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AkaConfig {
    /// Resynchronizations allowed per session before failing
    #[serde(default = "default_max_resync_attempts")]
    pub max_resync_attempts: u32,
}

fn default_max_resync_attempts() -> u32 {
    crate::method::aka::DEFAULT_MAX_RESYNC_ATTEMPTS
}

impl Default for AkaConfig {
    fn default() -> Self {
        AkaConfig {
            max_resync_attempts: default_max_resync_attempts(),
        }
    }
}

/// Authenticator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sessions idle longer than this are removed
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,

    /// Terminal sessions are kept this long for late retransmissions
    #[serde(default = "default_terminal_grace_secs")]
    pub terminal_grace_secs: u64,

    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Method assigned to new sessions
    #[serde(default = "default_method")]
    pub default_method: EapType,

    #[serde(default)]
    pub aka: AkaConfig,

    /// Audit log file path (JSON lines); disabled when unset
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// Subscribers served by the static credential authority
    #[serde(default)]
    pub subscribers: Vec<SubscriberConfig>,
}

fn default_session_idle_timeout_secs() -> u64 {
    300
}

fn default_terminal_grace_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    crate::session::memory::DEFAULT_MAX_SESSIONS
}

fn default_method() -> EapType {
    EapType::Aka
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            terminal_grace_secs: default_terminal_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_sessions: default_max_sessions(),
            default_method: default_method(),
            aka: AkaConfig::default(),
            audit_log_path: None,
            subscribers: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_secs(self.terminal_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session_idle_timeout_secs cannot be 0".to_string(),
            ));
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs cannot be 0".to_string(),
            ));
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions cannot be 0".to_string()));
        }

        if self.default_method != EapType::Aka {
            return Err(ConfigError::Invalid(format!(
                "Unsupported default method: {}",
                self.default_method
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for subscriber in &self.subscribers {
            if subscriber.imsi.is_empty() {
                return Err(ConfigError::Invalid("Subscriber has empty imsi".to_string()));
            }
            if !seen.insert(subscriber.imsi.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate subscriber: {}",
                    subscriber.imsi
                )));
            }
            subscriber.to_vectors()?;
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        Config {
            session_idle_timeout_secs: 300,
            terminal_grace_secs: 10,
            sweep_interval_secs: 30,
            max_sessions: 100_000,
            default_method: EapType::Aka,
            aka: AkaConfig {
                max_resync_attempts: 1,
            },
            audit_log_path: Some("/var/log/eap/audit.log".to_string()),
            subscribers: vec![SubscriberConfig {
                imsi: "001010000000001".to_string(),
                msisdn: Some("15551234567".to_string()),
                rand: "23553cbe9637a89d218ae64dae47bf35".to_string(),
                autn: "55f328b43577b9b94a9ffac354dfafb3".to_string(),
                xres: "a54211d5e3ba50bf".to_string(),
                ck: "b40ba9a3c58b2a05bbf0d987b21bf8cb".to_string(),
                ik: "f769bcd751044604127672711c6d3441".to_string(),
            }],
        }
    }
}
