//! Configuration parsing and validation.
//!
//! partkv configuration is loaded from a TOML file with CLI overrides.
//!
//! ```toml
//! [store]
//! local_addr = "127.0.0.1:9779"
//! data_paths = ["data/engines"]
//! wal_path = "data/wal"
//!
//! [[placement.parts]]
//! space = 1
//! part = 1
//! ```

use crate::control::{PartMeta, PartsMap};
use crate::core::host::HostAddr;
use crate::store::{ReadPolicy, StoreOptions};
use crate::{PartitionId, SpaceId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level partkv configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store identity and storage locations.
    #[serde(default)]
    pub store: StoreConfig,

    /// Replication tuning.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Tokio runtime sizing.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Placement provider and its seed table.
    #[serde(default)]
    pub placement: PlacementConfig,
}

/// Store identity and storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Cluster identifier shared by every replica group.
    #[serde(default)]
    pub cluster_id: u64,

    /// Service address of this host. The replication port is one above it.
    #[serde(default = "default_local_addr")]
    pub local_addr: String,

    /// Engine roots. Empty keeps every engine in memory.
    #[serde(default)]
    pub data_paths: Vec<String>,

    /// Root of the per-partition logs. Unset keeps logs in memory.
    #[serde(default)]
    pub wal_path: Option<String>,

    /// Which replicas serve reads.
    #[serde(default)]
    pub read_policy: ReadPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cluster_id: 0,
            local_addr: default_local_addr(),
            data_paths: Vec::new(),
            wal_path: None,
            read_policy: ReadPolicy::default(),
        }
    }
}

/// Replication tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Appends a partition may queue before failing with backpressure.
    #[serde(default = "default_append_buffer_size")]
    pub append_buffer_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            append_buffer_size: default_append_buffer_size(),
        }
    }
}

/// Tokio runtime sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads; 0 uses one per core.
    #[serde(default)]
    pub worker_threads: usize,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Placement provider and its seed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Provider: "memory" or "meta".
    #[serde(default = "default_placement_mode")]
    pub mode: String,

    /// Partitions known at startup.
    #[serde(default)]
    pub parts: Vec<PartSeed>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            mode: default_placement_mode(),
            parts: Vec::new(),
        }
    }
}

/// One partition of the seed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSeed {
    pub space: SpaceId,
    pub part: PartitionId,
    /// Service addresses of the replica group. Empty places the partition
    /// on this host alone.
    #[serde(default)]
    pub peers: Vec<String>,
}

// Default value functions

fn default_local_addr() -> String {
    "127.0.0.1:9779".to_string()
}

fn default_append_buffer_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_placement_mode() -> String {
    "memory".to_string()
}

fn parse_addr(field: &str, value: &str) -> Result<HostAddr> {
    value
        .parse::<HostAddr>()
        .with_context(|| format!("{field} is not a valid host address: {value}"))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref local_addr) = overrides.local_addr {
            self.store.local_addr = local_addr.clone();
        }
        if let Some(ref data_path) = overrides.data_path {
            self.store.data_paths = vec![data_path.clone()];
        }
        if let Some(ref wal_path) = overrides.wal_path {
            self.store.wal_path = Some(wal_path.clone());
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_store()?;
        self.validate_replication()?;
        self.validate_telemetry()?;
        self.validate_placement()?;
        Ok(())
    }

    fn validate_store(&self) -> Result<()> {
        let addr = parse_addr("store.local_addr", &self.store.local_addr)?;
        if addr.is_unset() {
            anyhow::bail!("store.local_addr must not be the unset address");
        }
        // Both derived ports must exist.
        if addr.port == 0 || addr.port == u16::MAX {
            anyhow::bail!(
                "store.local_addr port must be between 1 and {}, got: {}",
                u16::MAX - 1,
                addr.port
            );
        }
        if self.store.data_paths.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("store.data_paths must not contain empty paths");
        }
        if self.store.wal_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
            anyhow::bail!("store.wal_path must not be empty when set");
        }
        Ok(())
    }

    fn validate_replication(&self) -> Result<()> {
        if self.replication.append_buffer_size == 0 {
            anyhow::bail!("replication.append_buffer_size must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_placement(&self) -> Result<()> {
        if self.placement.mode != "memory" && self.placement.mode != "meta" {
            anyhow::bail!(
                "placement.mode must be 'memory' or 'meta', got: {}",
                self.placement.mode
            );
        }

        let mut seen = HashSet::new();
        for seed in &self.placement.parts {
            if !seen.insert((seed.space, seed.part)) {
                anyhow::bail!(
                    "placement.parts lists partition {}:{} more than once",
                    seed.space,
                    seed.part
                );
            }
            for peer in &seed.peers {
                parse_addr("placement.parts.peers", peer)?;
            }
        }
        Ok(())
    }

    /// Service address of this host.
    pub fn local_addr(&self) -> Result<HostAddr> {
        parse_addr("store.local_addr", &self.store.local_addr)
    }

    /// Store options described by the `[store]` section.
    pub fn store_options(&self) -> Result<StoreOptions> {
        Ok(StoreOptions {
            cluster_id: self.store.cluster_id,
            local_addr: self.local_addr()?,
            data_paths: self.store.data_paths.iter().map(PathBuf::from).collect(),
            wal_path: self.store.wal_path.as_ref().map(PathBuf::from),
            read_policy: self.store.read_policy,
        })
    }

    /// The seed table as placement metadata.
    pub fn placement_seed(&self) -> Result<PartsMap> {
        let mut table = PartsMap::new();
        for seed in &self.placement.parts {
            let peers = seed
                .peers
                .iter()
                .map(|p| parse_addr("placement.parts.peers", p))
                .collect::<Result<Vec<_>>>()?;
            table
                .entry(seed.space)
                .or_default()
                .insert(seed.part, PartMeta::new(seed.space, seed.part, peers));
        }
        Ok(table)
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the service address.
    pub local_addr: Option<String>,
    /// Replace the engine roots with a single path.
    pub data_path: Option<String>,
    /// Override the log root.
    pub wal_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [store]
        local_addr = "10.0.0.1:9779"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.store.read_policy, ReadPolicy::AnyReplica);
        assert_eq!(config.replication.append_buffer_size, 1024);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.placement.mode, "memory");
        assert!(config.store_options().unwrap().data_paths.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [store]
            cluster_id = 7
            local_addr = "127.0.0.1:4000"
            data_paths = ["/data/a", "/data/b"]
            wal_path = "/data/wal"
            read_policy = "leader_only"

            [replication]
            append_buffer_size = 8

            [runtime]
            worker_threads = 2

            [placement]
            mode = "meta"

            [[placement.parts]]
            space = 1
            part = 1
            peers = ["127.0.0.1:4000", "127.0.0.1:5000"]

            [[placement.parts]]
            space = 1
            part = 2
            "#,
        )
        .unwrap();

        let options = config.store_options().unwrap();
        assert_eq!(options.cluster_id, 7);
        assert_eq!(options.read_policy, ReadPolicy::LeaderOnly);
        assert_eq!(options.data_paths.len(), 2);
        assert_eq!(options.wal_path, Some(PathBuf::from("/data/wal")));
        assert_eq!(config.runtime.worker_threads, 2);

        let seed = config.placement_seed().unwrap();
        assert_eq!(seed[&1][&1].peers.len(), 2);
        assert!(seed[&1][&2].peers.is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_toml("[store]\nlocal_addr = \"nowhere\"").is_err());
        assert!(Config::from_toml("[store]\nlocal_addr = \"127.0.0.1:65535\"").is_err());
        assert!(Config::from_toml(&format!("{MINIMAL}\n[telemetry]\nlog_level = \"loud\"")).is_err());
        assert!(Config::from_toml(&format!("{MINIMAL}\n[placement]\nmode = \"zk\"")).is_err());
        assert!(Config::from_toml(&format!(
            "{MINIMAL}\n[replication]\nappend_buffer_size = 0"
        ))
        .is_err());
        assert!(Config::from_toml(&format!(
            "{MINIMAL}\n[[placement.parts]]\nspace = 1\npart = 1\n[[placement.parts]]\nspace = 1\npart = 1"
        ))
        .is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".into()),
            local_addr: Some("127.0.0.1:7000".into()),
            data_path: Some("/tmp/engines".into()),
            wal_path: Some("/tmp/wal".into()),
        });
        config.validate().unwrap();
        assert_eq!(config.local_addr().unwrap(), HostAddr::localhost(7000));
        assert_eq!(config.store.data_paths, vec!["/tmp/engines".to_string()]);
        assert_eq!(config.store.wal_path.as_deref(), Some("/tmp/wal"));
    }
}
