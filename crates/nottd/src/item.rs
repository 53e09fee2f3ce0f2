//! Building items for `put`
//!
//! Mutable items are signed here with an ed25519 key derived from a 32 byte
//! seed; the DHT itself only passes the key and signature along.

use anyhow::{Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use nott_dht::PutItem;
use nott_protocol::item::signable;
use nott_protocol::Value;

/// Parse a hex encoded 32 byte seed into a signing key
pub fn signing_key(seed_hex: &str) -> Result<SigningKey> {
    let seed = hex::decode(seed_hex).context("Seed is not valid hex")?;
    let seed: [u8; 32] = seed
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Seed must be 32 bytes, got {}", seed.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// A mutable item signed by `key`
pub fn signed_item(key: &SigningKey, v: Value, salt: Option<Vec<u8>>, seq: i64) -> Result<PutItem> {
    let message = signable(salt.as_deref(), seq, &v)?;
    let signature = key.sign(&message);
    Ok(PutItem::mutable(
        v,
        key.verifying_key().to_bytes().to_vec(),
        salt,
        seq,
        signature.to_bytes().to_vec(),
    ))
}
