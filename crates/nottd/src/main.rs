//! Nott daemon - Mainline DHT node
//!
//! Runs a long-lived node, or performs a single lookup and prints what it
//! finds.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nott_dht::{Dht, PutItem, Refresh};
use nott_protocol::{NodeId, Value};
use nottd::config::{Config, LoggingConfig};
use nottd::item::{signed_item, signing_key};
use nottd::Node;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nottd")]
#[command(about = "Mainline DHT node")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "NOTTD_CONFIG")]
    config: Option<PathBuf>,

    /// Create a default configuration file and exit
    #[arg(long)]
    init: bool,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Seconds to wait for results of a one-shot lookup
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until interrupted
    Run,
    /// Ping a node
    Ping {
        addr: SocketAddr,
        /// Hex node ID the responder must have
        #[arg(long)]
        id: Option<String>,
    },
    /// Find the node owning an ID and its neighbours
    FindNode { target: String },
    /// Find peers announced for an info-hash
    GetPeers { info_hash: String },
    /// Announce this node as a peer for an info-hash
    Announce {
        info_hash: String,
        /// Port to announce; our source port when absent
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fetch items stored under a target
    Get {
        target: String,
        #[arg(long)]
        seq: Option<i64>,
    },
    /// Store a value; signed as a mutable item when a seed is given
    Put {
        value: String,
        /// Hex encoded 32 byte ed25519 seed
        #[arg(long, env = "NOTTD_SEED")]
        seed: Option<String>,
        #[arg(long)]
        salt: Option<String>,
        #[arg(long, default_value = "1")]
        seq: i64,
    },
}

fn init_logging(logging: &LoggingConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn parse_id(hex: &str) -> Result<NodeId> {
    NodeId::from_hex(hex).with_context(|| format!("Invalid 20 byte hex ID: {}", hex))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let config = Config::create_default(args.config)?;
        println!("Configuration written to {}", config.config_path().display());
        return Ok(());
    }

    let config = Config::load_or_create(args.config.clone())?;
    init_logging(&config.logging, args.log_level.as_deref());

    let command = args.command.unwrap_or(Command::Run);
    if let Command::Run = command {
        let mut node = Node::new(config).await?;
        return node.run().await;
    }

    let mut dht_config = config.dht.clone();
    // one-shot commands must not collide with a running node
    dht_config.port = 0;
    dht_config.node_id = None;
    let dht = Dht::bind(dht_config).await?;
    dht.bootstrap().await?;

    let timeout = Duration::from_secs(args.timeout);
    let result = run_command(&dht, command, timeout).await;
    dht.shutdown();
    result
}

async fn run_command(dht: &Dht, command: Command, timeout: Duration) -> Result<()> {
    match command {
        Command::Run => Ok(()),
        Command::Ping { addr, id } => {
            let expected = id.as_deref().map(parse_id).transpose()?;
            let answered = dht.ping(addr, expected).await?;
            println!("{}: {}", addr, if answered { "answered" } else { "no answer" });
            Ok(())
        }
        Command::FindNode { target } => {
            let target = parse_id(&target)?;
            let found = dht.find_node(target).collect_until(timeout).await;
            if found.is_empty() {
                println!("{} not found", target);
            }
            for addr in found {
                println!("{} {}", target, addr);
            }
            Ok(())
        }
        Command::GetPeers { info_hash } => {
            let info_hash = parse_id(&info_hash)?;
            let peers = dht.get_peers(info_hash).collect_until(timeout).await;
            info!("Found {} peers for {}", peers.len(), info_hash);
            for peer in peers {
                println!("{}", peer);
            }
            Ok(())
        }
        Command::Announce { info_hash, port } => {
            let info_hash = parse_id(&info_hash)?;
            let acknowledged = dht
                .announce(info_hash, port, Refresh::Once)
                .collect_until(timeout)
                .await;
            println!(
                "Announce of {} acknowledged by {} nodes",
                info_hash,
                acknowledged.len()
            );
            Ok(())
        }
        Command::Get { target, seq } => {
            let target = parse_id(&target)?;
            let items = dht.get(target, seq).collect_until(timeout).await;
            if items.is_empty() {
                println!("No items found for {}", target);
            }
            for item in items {
                println!("{:?} (seq {:?})", item.v, item.seq);
            }
            Ok(())
        }
        Command::Put {
            value,
            seed,
            salt,
            seq,
        } => {
            let v = Value::Bytes(value.into_bytes());
            let item = match seed {
                Some(seed) => {
                    let key = signing_key(&seed)?;
                    signed_item(&key, v, salt.map(String::into_bytes), seq)?
                }
                None => PutItem::immutable(v),
            };
            let target = item.target()?;
            let stored_at = dht.put(item, Refresh::Once)?.collect_until(timeout).await;
            println!("Stored {} on {} nodes", target, stored_at.len());
            Ok(())
        }
    }
}
