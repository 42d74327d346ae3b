//! Configuration management for the knowledge graph engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (kgraph.toml)
//! - Environment variables (KGRAPH_*)
//!
//! ## Example config file (kgraph.toml):
//! ```toml
//! [schemas]
//! dir = "./schemas"
//!
//! [storage]
//! backend = "memory"
//! op_timeout_secs = 30
//!
//! [validation]
//! check_references = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KgConfig {
    /// Schema source settings
    #[serde(default)]
    pub schemas: SchemasConfig,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Schema source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Directory holding the YAML schema definitions
    #[serde(default = "default_schemas_dir")]
    pub dir: PathBuf,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use ("memory" is the only built-in)
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,

    /// Per-operation deadline, in seconds
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Memory,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Run reference existence checks when a store is available
    #[serde(default = "default_true")]
    pub check_references: bool,

    /// Treat warnings as errors
    #[serde(default)]
    pub deny_warnings: bool,
}

// Default value functions
fn default_schemas_dir() -> PathBuf {
    PathBuf::from("./schemas")
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Memory
}

fn default_op_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for SchemasConfig {
    fn default() -> Self {
        Self {
            dir: default_schemas_dir(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            op_timeout_secs: default_op_timeout_secs(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_references: true,
            deny_warnings: false,
        }
    }
}

impl KgConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["kgraph.toml", ".kgraph.toml", "config/kgraph.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "kgraph", "kgraph") {
            let xdg_config = config_dir.config_dir().join("kgraph.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (KGRAPH_*)
        builder = builder.add_source(
            Environment::with_prefix("KGRAPH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Schema directory with relative paths resolved
    pub fn schemas_dir(&self) -> PathBuf {
        if self.schemas.dir.is_absolute() {
            self.schemas.dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.schemas.dir)
        }
    }

    /// Per-operation deadline as a `Duration`
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.op_timeout_secs)
    }
}
