// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Propagation Task Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing how a
// role propagation run behaves:
// - partitioning fan-out
// - run deadline
// - failure pruning and failure threshold
// - identity refresh after provisioning
// - optional provisioning workflow

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "propagation/v1";
pub const KIND: &str = "PropagationTask";

/// Top-level propagation task manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfigManifest {
    /// API version (must be "propagation/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "PropagationTask")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: PropagationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Settings consumed by the propagation engine (content under spec:)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationSettings {
    /// Upper bound on Provision partitions per event
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Run duration; 0 runs until the queue is exhausted
    #[serde(default)]
    pub duration_minutes: u64,

    /// Failed attempts before an event is pruned; 0 disables pruning
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i32,

    /// Percentage of failed identities that stops the run; 0 disables it
    #[serde(default)]
    pub max_failure_threshold: i32,

    #[serde(default)]
    pub check_policies: bool,

    #[serde(default)]
    pub policies: Vec<String>,

    /// Provisioning workflow launched instead of direct execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// zstd level used for compressed identity lists
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_max_partitions() -> usize {
    4
}

fn default_max_failed_attempts() -> i32 {
    3
}

fn default_compression_level() -> i32 {
    3
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            max_partitions: default_max_partitions(),
            duration_minutes: 0,
            max_failed_attempts: default_max_failed_attempts(),
            max_failure_threshold: 0,
            check_policies: false,
            policies: Vec::new(),
            workflow: None,
            compression_level: default_compression_level(),
        }
    }
}

impl PropagationSettings {
    /// Identities are refreshed after provisioning when policies are checked.
    pub fn is_identity_refresh_enabled(&self) -> bool {
        self.check_policies || !self.policies.is_empty()
    }
}

impl Default for PropagationConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "role-propagation".to_string(),
                labels: None,
            },
            spec: PropagationSettings::default(),
        }
    }
}

impl PropagationConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. PROPAGATOR_CONFIG_PATH environment variable
    /// 2. ./propagator-config.yaml (working directory)
    /// 3. ~/.propagator/config.yaml (user home)
    /// 4. /etc/propagator/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PROPAGATOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./propagator-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".propagator").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/propagator/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PROPAGATOR_MAX_PARTITIONS") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: PROPAGATOR_MAX_PARTITIONS={}", n);
                    self.spec.max_partitions = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for PROPAGATOR_MAX_PARTITIONS: '{}'. Expected a positive integer. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("PROPAGATOR_DURATION_MINUTES") {
            match val.parse::<u64>() {
                Ok(n) => {
                    tracing::info!("Environment override: PROPAGATOR_DURATION_MINUTES={}", n);
                    self.spec.duration_minutes = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for PROPAGATOR_DURATION_MINUTES: '{}'. Expected minutes. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.max_partitions < 1 {
            anyhow::bail!("spec.max_partitions must be at least 1");
        }

        if self.spec.max_failure_threshold > 100 {
            anyhow::bail!(
                "spec.max_failure_threshold must be a percentage (got {})",
                self.spec.max_failure_threshold
            );
        }

        if !(1..=22).contains(&self.spec.compression_level) {
            anyhow::bail!(
                "spec.compression_level must be between 1 and 22 (got {})",
                self.spec.compression_level
            );
        }

        if let Some(workflow) = &self.spec.workflow {
            if workflow.trim().is_empty() {
                anyhow::bail!("spec.workflow cannot be blank when set");
            }
        }

        Ok(())
    }
}
