//! Process configuration
//!
//! The configuration is read from a RON file once at startup. Every value the
//! session actors need is resolved here, so a missing or empty required entry
//! stops the process before anything connects.

use crate::errors::{config_error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub fsd: FsdConfig,
    pub server: ServerIdentity,
    #[serde(default)]
    pub event_bus: Option<EventBusConfig>,
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub upload_targets: Vec<UploadTarget>,
    #[serde(default)]
    pub timings: SessionTimings,
}

/// Upstream hub address
#[derive(Debug, Clone, Deserialize)]
pub struct FsdConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// How this process presents itself to the network, both as a server and as
/// the synthetic controller client
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIdentity {
    #[serde(default = "default_name")]
    pub name: String,
    pub email: String,
    pub location: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_version")]
    pub version: String,
}

/// Kafka REST proxy the roster events are posted to
#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    pub directory: PathBuf,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

impl SnapshotConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

/// S3-compatible bucket the snapshot file is pushed to after each write
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTarget {
    pub name: String,
    /// Host name, or a full URL when the endpoint is not served over https
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_object_key")]
    pub object_key: String,
}

impl UploadTarget {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        }
    }
}

/// Cadences of the session actors, all in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    pub announce_interval: u64,
    pub announce_sync_delay: u64,
    pub keepalive_interval: u64,
    pub atis_grace: u64,
    pub atis_interval: u64,
    pub sweep_grace: u64,
    pub sweep_interval: u64,
    pub max_client_age: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        SessionTimings {
            announce_interval: 300,
            announce_sync_delay: 2,
            keepalive_interval: 20,
            atis_grace: 30,
            atis_interval: 60,
            sweep_grace: 30,
            sweep_interval: 10,
            max_client_age: 30,
        }
    }
}

fn default_port() -> u16 {
    4113
}

fn default_name() -> String {
    "DSERVERNG".to_string()
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_version() -> String {
    "v1.0".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_object_key() -> String {
    "vatsim-data.json".to_string()
}

fn default_debounce_secs() -> u64 {
    15
}

fn default_retry_secs() -> u64 {
    5
}

impl Config {
    /// Reads and validates the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {}", path.display(), e))?;
        Self::from_ron(&contents)
    }

    pub fn from_ron(contents: &str) -> Result<Self> {
        let config: Config = ron::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects required values that are present but empty
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("fsd.host", self.fsd.host.as_str()),
            ("server.name", self.server.name.as_str()),
            ("server.email", self.server.email.as_str()),
            ("server.location", self.server.location.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(config_error!("{} must not be empty", key));
            }
        }

        if self.snapshot.directory.as_os_str().is_empty() {
            return Err(config_error!("snapshot.directory must not be empty"));
        }

        if let Some(bus) = &self.event_bus {
            if bus.url.trim().is_empty() {
                return Err(config_error!("event_bus.url must not be empty"));
            }
        }

        for target in &self.upload_targets {
            let required = [
                ("endpoint", target.endpoint.as_str()),
                ("bucket", target.bucket.as_str()),
                ("access_key", target.access_key.as_str()),
                ("secret_key", target.secret_key.as_str()),
                ("object_key", target.object_key.as_str()),
            ];
            for (key, value) in required {
                if value.trim().is_empty() {
                    return Err(config_error!(
                        "upload target {} has an empty {}",
                        target.name,
                        key
                    ));
                }
            }
        }

        let intervals = [
            ("timings.announce_interval", self.timings.announce_interval),
            ("timings.keepalive_interval", self.timings.keepalive_interval),
            ("timings.atis_interval", self.timings.atis_interval),
            ("timings.sweep_interval", self.timings.sweep_interval),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(config_error!("{} must be positive", key));
            }
        }

        Ok(())
    }

    /// `host:port` of the upstream hub
    pub fn hub_address(&self) -> String {
        format!("{}:{}", self.fsd.host, self.fsd.port)
    }
}
