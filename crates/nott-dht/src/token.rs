//! Write tokens
//!
//! A token proves that a requester recently asked us about a key from the
//! address it claims. Tokens are not stored: each one is a truncated hash
//! over the request context, a window stamp and a process secret, and is
//! recomputed on verification for the current and the previous window.

use blake2::{Blake2b512, Digest};
use nott_protocol::address::encode_compact_addr;
use nott_protocol::NodeId;
use rand::{Rng, RngCore};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Length of an issued token
pub const TOKEN_LENGTH: usize = 4;

const SECRET_LENGTH: usize = 20;

struct Windows {
    current: u64,
    previous: u64,
    started: Instant,
}

pub struct TokenManager {
    secret: [u8; SECRET_LENGTH],
    rotation: Duration,
    windows: Mutex<Windows>,
}

impl TokenManager {
    pub fn new(rotation: Duration) -> Self {
        Self::starting_at(rotation, Instant::now())
    }

    fn starting_at(rotation: Duration, now: Instant) -> Self {
        let mut secret = [0u8; SECRET_LENGTH];
        rand::thread_rng().fill_bytes(&mut secret);
        let mut rng = rand::thread_rng();

        TokenManager {
            secret,
            rotation,
            windows: Mutex::new(Windows {
                current: rng.gen(),
                previous: rng.gen(),
                started: now,
            }),
        }
    }

    pub fn generate_token(&self, id: &NodeId, addr: &SocketAddr, key: &NodeId) -> Vec<u8> {
        self.generate_token_at(id, addr, key, Instant::now())
    }

    pub fn check_token(&self, token: &[u8], id: &NodeId, addr: &SocketAddr, key: &NodeId) -> bool {
        self.check_token_at(token, id, addr, key, Instant::now())
    }

    fn generate_token_at(
        &self,
        id: &NodeId,
        addr: &SocketAddr,
        key: &NodeId,
        now: Instant,
    ) -> Vec<u8> {
        let (current, _) = self.stamps(now);
        self.hash(id, addr, current, key).to_vec()
    }

    fn check_token_at(
        &self,
        token: &[u8],
        id: &NodeId,
        addr: &SocketAddr,
        key: &NodeId,
        now: Instant,
    ) -> bool {
        let (current, previous) = self.stamps(now);
        token == self.hash(id, addr, current, key) || token == self.hash(id, addr, previous, key)
    }

    /// Rotate as many windows as have elapsed and return (current, previous)
    fn stamps(&self, now: Instant) -> (u64, u64) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(windows.started);
        let rotations = (elapsed.as_nanos() / self.rotation.as_nanos().max(1)) as u64;

        if rotations > 0 {
            let mut rng = rand::thread_rng();
            windows.previous = if rotations == 1 {
                windows.current
            } else {
                rng.gen()
            };
            windows.current = rng.gen();
            let advanced = self
                .rotation
                .checked_mul(rotations.min(u32::MAX as u64) as u32)
                .unwrap_or(elapsed);
            windows.started += advanced.min(elapsed);
        }

        (windows.current, windows.previous)
    }

    fn hash(&self, id: &NodeId, addr: &SocketAddr, stamp: u64, key: &NodeId) -> [u8; TOKEN_LENGTH] {
        let mut hasher = Blake2b512::new();
        hasher.update(id.as_bytes());
        hasher.update(encode_compact_addr(addr));
        hasher.update(stamp.to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(self.secret);
        let digest = hasher.finalize();

        let mut token = [0u8; TOKEN_LENGTH];
        token.copy_from_slice(&digest[..TOKEN_LENGTH]);
        token
    }
}
