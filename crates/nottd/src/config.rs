use anyhow::{Context, Result};
use nott_dht::DhtConfig;
use nott_protocol::NodeId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dht: DhtConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Info-hashes announced for as long as the node runs
    #[serde(default)]
    pub announces: Vec<AnnounceConfig>,
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    #[serde(skip)]
    config_file_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnounceConfig {
    /// Hex encoded info-hash
    pub info_hash: String,
    /// Port to announce; the source port of our datagrams when absent
    #[serde(default)]
    pub port: Option<u16>,
}

impl AnnounceConfig {
    pub fn info_hash(&self) -> Result<NodeId> {
        NodeId::from_hex(&self.info_hash)
            .with_context(|| format!("Invalid info-hash in announce: {}", self.info_hash))
    }
}

fn default_announce_interval() -> u64 {
    15 * 60 // Peers drop announces after about half an hour
}

impl Config {
    /// Load configuration from file
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);

        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nRun with --init to create a new configuration",
                config_path.display()
            );
        }

        let contents =
            fs::read_to_string(&config_path).context("Failed to read configuration file")?;

        let mut config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse configuration file")?;
        config.config_file_path = config_path;
        config.validate()?;

        Ok(config)
    }

    /// Create a new default configuration with a freshly generated node ID
    pub fn create_default(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let config = Config {
            dht: DhtConfig {
                node_id: Some(NodeId::generate().to_hex()),
                ..DhtConfig::default()
            },
            logging: LoggingConfig::default(),
            announces: Vec::new(),
            announce_interval_secs: default_announce_interval(),
            config_file_path: config_path.clone(),
        };

        config.save()?;
        Ok(config)
    }

    /// Load the configuration, creating a default one if none exists yet
    pub fn load_or_create(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        if config_path.exists() {
            Self::load(Some(config_path))
        } else {
            Self::create_default(Some(config_path))
        }
    }

    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(&self.config_file_path, yaml).with_context(|| {
            format!(
                "Failed to write configuration file {}",
                self.config_file_path.display()
            )
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.dht
            .validate()
            .context("Invalid DHT configuration")?;
        for announce in &self.announces {
            announce.info_hash()?;
        }
        if self.announce_interval_secs == 0 {
            anyhow::bail!("announce_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file_path
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nottd")
            .join("config.yaml")
    }
}
