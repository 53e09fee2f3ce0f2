//! Nott DHT
//!
//! A Mainline DHT node built around an iterative lookup engine:
//! - Routing table of verified peers
//! - Per-lookup candidate graph with provenance-based admission control
//! - Bounded closest set with stabilization detection
//! - Lookups for nodes, content peers and stored items, plus put and announce
//! - Server side answering queries from other nodes

pub mod call;
pub mod candidates;
pub mod closest_set;
pub mod config;
pub mod database;
pub mod dht;
pub mod error;
pub mod lookup;
pub mod peer;
pub mod routing_table;
mod throttle;
pub mod token;

pub use call::{Call, CallState};
pub use candidates::Candidates;
pub use closest_set::{CallCheck, ClosestSet};
pub use config::DhtConfig;
pub use database::Database;
pub use dht::Dht;
pub use error::{DhtError, Result};
pub use lookup::{Lookup, LookupCanceller, PutItem, Refresh};
pub use peer::Peer;
pub use routing_table::RoutingTable;
pub use token::TokenManager;

use std::time::Duration;

/// Size of the closest set and of node lists handed out to other nodes
pub const K: usize = 8;

/// Number of routing table entries a lookup is seeded with
pub const SEED_CANDIDATES: usize = 32;

/// Time after which an unanswered request counts as failed
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Token rotation period
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Maximum number of peers stored for one info-hash
pub const MAX_DB_ENTRIES_PER_KEY: usize = 6000;

/// Maximum number of peers returned in one `get_peers` reply
pub const MAX_PEERS_PER_ANNOUNCE: usize = 10;

/// Entries not seen for this long are replaced after a single failure
pub const OLD_AND_STALE_TIME: Duration = Duration::from_secs(15 * 60);

/// No DHT message is shorter than this
pub const MIN_DATAGRAM_LEN: usize = 10;
