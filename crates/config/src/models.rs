use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub metadata: MetadataConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub broadcast: BroadcastConfig,
    pub history: HistoryConfig,
    pub log: LogConfig,
}

impl Config {
    /// Reject values that would stall the scanner or the live stream.
    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("scan.concurrency"));
        }
        if self.scan.unit_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("scan.unit_timeout_secs"));
        }
        if self.scan.deadline_secs == 0 {
            exn::bail!(ErrorKind::Invalid("scan.deadline_secs"));
        }
        if self.broadcast.update_interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("broadcast.update_interval_secs"));
        }
        if self.broadcast.heartbeat_interval_secs == 0 {
            exn::bail!(ErrorKind::Invalid("broadcast.heartbeat_interval_secs"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)) }
    }
}

/// Location of the upload registry and the service database that maps
/// database references to files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub uploads_db: PathBuf,
    pub service_db: PathBuf,
}
impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            uploads_db: PathBuf::from("data.db"),
            service_db: PathBuf::from("service.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub unit_timeout_secs: u64,
    /// Overall budget of one on-demand scan.
    pub deadline_secs: u64,
}
impl Default for ScanConfig {
    fn default() -> Self {
        Self { concurrency: 5, unit_timeout_secs: 5, deadline_secs: 300 }
    }
}
impl ScanConfig {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Zero falls back to the cache's built-in default.
    pub ttl_secs: u64,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 120 }
    }
}
impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub update_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
}
impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { update_interval_secs: 10, heartbeat_interval_secs: 10 }
    }
}
impl BroadcastConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Scan history is only recorded when `path` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: Option<PathBuf>,
    pub default_limit: usize,
}
impl Default for HistoryConfig {
    fn default() -> Self {
        Self { path: None, default_limit: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}
