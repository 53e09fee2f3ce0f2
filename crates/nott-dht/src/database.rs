//! Announced peers and write tokens
//!
//! Keeps the addresses announced for each info-hash. Admission of new keys
//! is randomized once the store for a key fills up, so a flood of announces
//! degrades acceptance gradually instead of failing hard.

use dashmap::DashMap;
use nott_protocol::NodeId;
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;

use crate::token::TokenManager;
use crate::{MAX_DB_ENTRIES_PER_KEY, MAX_PEERS_PER_ANNOUNCE};

pub struct Database {
    peers: DashMap<NodeId, Vec<SocketAddr>>,
    tokens: TokenManager,
}

impl Database {
    pub fn new(token_rotation: Duration) -> Self {
        Database {
            peers: DashMap::new(),
            tokens: TokenManager::new(token_rotation),
        }
    }

    /// Whether another announce for `key` should be invited with a token
    pub fn insert_for_key_allowed(&self, key: &NodeId) -> bool {
        let size = self.peers.get(key).map(|entry| entry.len()).unwrap_or(0);
        if size < MAX_DB_ENTRIES_PER_KEY / 5 {
            return true;
        }
        if size >= MAX_DB_ENTRIES_PER_KEY {
            return false;
        }
        size < rand::thread_rng().gen_range(0..MAX_DB_ENTRIES_PER_KEY)
    }

    /// Record an announced address; returns false if it was known or the key is full
    pub fn store(&self, key: NodeId, addr: SocketAddr) -> bool {
        let mut entry = self.peers.entry(key).or_default();
        if entry.contains(&addr) || entry.len() >= MAX_DB_ENTRIES_PER_KEY {
            return false;
        }
        entry.push(addr);
        true
    }

    /// A random sample of the addresses announced for `key`
    pub fn sample(&self, key: &NodeId) -> Vec<SocketAddr> {
        let Some(entry) = self.peers.get(key) else {
            return Vec::new();
        };
        let mut rng = rand::thread_rng();
        entry
            .choose_multiple(&mut rng, MAX_PEERS_PER_ANNOUNCE)
            .copied()
            .collect()
    }

    pub fn len(&self, key: &NodeId) -> usize {
        self.peers.get(key).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn generate_token(&self, id: &NodeId, addr: &SocketAddr, key: &NodeId) -> Vec<u8> {
        self.tokens.generate_token(id, addr, key)
    }

    pub fn check_token(&self, token: &[u8], id: &NodeId, addr: &SocketAddr, key: &NodeId) -> bool {
        self.tokens.check_token(token, id, addr, key)
    }
}
