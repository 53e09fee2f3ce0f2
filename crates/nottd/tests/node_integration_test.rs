/**
 * Daemon integration tests
 *
 * Configuration files on disk and the node lifecycle on a loopback socket.
 */
use anyhow::Result;
use nottd::config::{AnnounceConfig, Config};
use nottd::Node;
use std::fs;
use tempfile::TempDir;

fn loopback_config(dir: &TempDir) -> Result<Config> {
    let path = dir.path().join("config.yaml");
    let mut config = Config::create_default(Some(path))?;
    config.dht.bind_addr = "127.0.0.1".to_string();
    config.dht.port = 0;
    config.dht.bootstrap_nodes = Vec::new();
    Ok(config)
}

#[test]
fn test_yaml_with_only_dht_section() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "dht:\n  port: 7000\n  read_only: true\n  bootstrap_nodes: []\n",
    )?;

    let config = Config::load(Some(path))?;
    assert_eq!(config.dht.port, 7000);
    assert!(config.dht.read_only);
    assert!(config.dht.bootstrap_nodes.is_empty());
    assert_eq!(config.dht.response_timeout_ms, 3000);
    assert_eq!(config.logging.level, "info");
    assert!(config.announces.is_empty());
    Ok(())
}

#[test]
fn test_invalid_announce_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "dht: {}\nannounces:\n  - info_hash: nothex\n",
    )?;

    assert!(Config::load(Some(path)).is_err());
    Ok(())
}

#[test]
fn test_saved_announces_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = loopback_config(&dir)?;
    config.announces.push(AnnounceConfig {
        info_hash: "e5f96f6f38320f0f33959cb4d3d656452117aadb".to_string(),
        port: Some(51413),
    });
    config.save()?;

    let loaded = Config::load(Some(config.config_path().to_path_buf()))?;
    assert_eq!(loaded.announces, config.announces);
    assert_eq!(loaded.dht.port, 0);
    Ok(())
}

#[tokio::test]
async fn test_node_runs_until_shutdown() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = loopback_config(&dir)?;
    config.announces.push(AnnounceConfig {
        info_hash: "e5f96f6f38320f0f33959cb4d3d656452117aadb".to_string(),
        port: None,
    });

    let mut node = Node::new(config).await?;
    let addr = node.dht().local_addr()?;
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0);

    node.shutdown_handle().send(()).await?;
    node.run().await?;
    assert!(node.dht().is_shut_down());
    Ok(())
}
