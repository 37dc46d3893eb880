//! TOML configuration for the `tern` CLI.
//!
//! Every section is optional; a missing file means all defaults. Command-line
//! flags override what is loaded here.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tern_placement::PathHasher;
use tern_types::Policy;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where ring artifacts live.
    pub rings: RingsSection,
    /// Path-hash salts shared by the cluster.
    pub hash: HashSection,
    /// Replication-queue store.
    pub meta: MetaSection,
    /// Object-storage policy registry.
    pub policies: Vec<PolicyEntry>,
    /// Dispersion audit tuning.
    pub dispersion: DispersionSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[rings]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RingsSection {
    /// Directory holding `container.ring`, `object.ring` and `object-N.ring`.
    pub dir: PathBuf,
}

impl Default for RingsSection {
    fn default() -> Self {
        Self {
            dir: data_dir().join("rings"),
        }
    }
}

/// `[hash]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HashSection {
    pub prefix: String,
    pub suffix: String,
}

/// `[meta]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MetaSection {
    /// Fjall database directory.
    pub path: PathBuf,
}

impl Default for MetaSection {
    fn default() -> Self {
        Self {
            path: data_dir().join("meta"),
        }
    }
}

/// One `[[policies]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyEntry {
    pub index: u32,
    pub name: String,
}

/// `[dispersion]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DispersionSection {
    /// Name-generator worker threads. Defaults to available parallelism.
    pub workers: Option<usize>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn path_hasher(&self) -> PathHasher {
        PathHasher::new(self.hash.prefix.clone(), self.hash.suffix.clone())
    }

    /// Configured policies as registry entries.
    pub fn policy_list(&self) -> Vec<Policy> {
        self.policies
            .iter()
            .map(|p| Policy {
                index: p.index,
                name: p.name.clone(),
            })
            .collect()
    }
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tern"))
        .unwrap_or_else(|| PathBuf::from(".tern"))
}
