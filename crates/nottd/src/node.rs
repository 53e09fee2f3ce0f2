use anyhow::{Context, Result};
use nott_dht::{Dht, Lookup, Refresh};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Main node orchestrator
pub struct Node {
    config: Config,
    dht: Dht,
    announcers: Vec<JoinHandle<()>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing node components...");

        let dht = Dht::bind(config.dht.clone())
            .await
            .context("Failed to start DHT node")?;
        info!("✓ DHT node initialized");

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            dht,
            announcers: Vec::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn dht(&self) -> &Dht {
        &self.dht
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Starting Nott services...");

        let known = self.dht.bootstrap().await?;
        info!("✓ Routing table holds {} peers", known);

        self.start_announces()?;

        info!("═══════════════════════════════════════════════");
        info!("  Nott node is now running");
        info!("═══════════════════════════════════════════════");
        info!("  Node ID: {}", self.dht.node_id());
        if let Ok(addr) = self.dht.local_addr() {
            info!("  Listening: {}", addr);
        }
        if self.config.dht.read_only {
            info!("  Mode: read-only");
        }
        info!("  Config: {}", self.config.config_path().display());
        info!("═══════════════════════════════════════════════");

        self.wait_for_shutdown().await;

        info!("Shutting down Nott node...");
        self.shutdown();

        Ok(())
    }

    fn start_announces(&mut self) -> Result<()> {
        let interval = Duration::from_secs(self.config.announce_interval_secs);
        for announce in &self.config.announces {
            let info_hash = announce.info_hash()?;
            let lookup = self
                .dht
                .announce(info_hash, announce.port, Refresh::Every(interval));
            self.announcers.push(tokio::spawn(log_acknowledgements(
                info_hash.to_string(),
                lookup,
            )));
            info!("  ✓ Announcing {}", info_hash);
        }
        Ok(())
    }

    async fn wait_for_shutdown(&mut self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = self.shutdown_rx.recv() => {
                info!("Received shutdown signal");
            }
        }
    }

    fn shutdown(&mut self) {
        info!("Stopping announces...");
        for announcer in self.announcers.drain(..) {
            announcer.abort();
        }

        info!("Stopping DHT node...");
        self.dht.shutdown();

        info!("Shutdown complete");
    }

    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}

async fn log_acknowledgements(info_hash: String, mut lookup: Lookup<SocketAddr>) {
    let mut acknowledged = 0usize;
    while let Some(node) = lookup.next().await {
        acknowledged += 1;
        debug!("Announce of {} acknowledged by {}", info_hash, node);
    }
    if acknowledged == 0 {
        warn!("Announce of {} was never acknowledged", info_hash);
    }
}
