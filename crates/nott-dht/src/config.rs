//! DHT node configuration

use nott_protocol::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DhtError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Do not answer queries and ask others not to add us to their tables
    #[serde(default)]
    pub read_only: bool,
    /// Hex encoded node id; a fresh one is generated when absent
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_bootstrap_nodes")]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_token_rotation_secs")]
    pub token_rotation_secs: u64,
    /// Results buffered per lookup before the driver waits on the consumer
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,
    /// Upper bound on how long the driver sleeps between drains
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6881
}

fn default_bootstrap_nodes() -> Vec<String> {
    vec![
        "router.bittorrent.com:6881".to_string(),
        "dht.transmissionbt.com:6881".to_string(),
        "router.utorrent.com:6881".to_string(),
        "router.bitcomet.com:6881".to_string(),
    ]
}

fn default_response_timeout_ms() -> u64 {
    crate::RESPONSE_TIMEOUT.as_millis() as u64
}

fn default_token_rotation_secs() -> u64 {
    crate::TOKEN_TIMEOUT.as_secs()
}

fn default_result_capacity() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

impl Default for DhtConfig {
    fn default() -> Self {
        DhtConfig {
            bind_addr: default_bind_addr(),
            port: default_port(),
            read_only: false,
            node_id: None,
            bootstrap_nodes: default_bootstrap_nodes(),
            response_timeout_ms: default_response_timeout_ms(),
            token_rotation_secs: default_token_rotation_secs(),
            result_capacity: default_result_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl DhtConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn token_rotation(&self) -> Duration {
        Duration::from_secs(self.token_rotation_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// The configured id, or a freshly generated one
    pub fn resolve_node_id(&self) -> Result<NodeId> {
        match &self.node_id {
            Some(hex) => NodeId::from_hex(hex)
                .map_err(|e| DhtError::InvalidConfig(format!("node_id: {}", e))),
            None => Ok(NodeId::generate()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(DhtError::InvalidConfig(
                "response_timeout_ms must be positive".to_string(),
            ));
        }
        if self.token_rotation_secs == 0 {
            return Err(DhtError::InvalidConfig(
                "token_rotation_secs must be positive".to_string(),
            ));
        }
        if self.result_capacity == 0 {
            return Err(DhtError::InvalidConfig(
                "result_capacity must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.maintenance_interval_secs == 0 {
            return Err(DhtError::InvalidConfig(
                "intervals must be positive".to_string(),
            ));
        }
        self.resolve_node_id().map(|_| ())
    }
}
