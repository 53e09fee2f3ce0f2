//! Targets and signing input for stored items (BEP 44)

use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use crate::error::{ProtocolError, Result};
use crate::types::NodeId;

/// Maximum size of a bencoded value
pub const MAX_VALUE_SIZE: usize = 1000;

/// Maximum length of a salt
pub const MAX_SALT_SIZE: usize = 64;

fn sha1_id(data: &[u8]) -> NodeId {
    let digest = Sha1::digest(data);
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest);
    NodeId::from_bytes(id)
}

pub fn encode_value(v: &Value) -> Result<Vec<u8>> {
    serde_bencode::to_bytes(v).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
}

/// Target of an immutable item: SHA-1 of its bencoded value
pub fn immutable_target(v: &Value) -> Result<NodeId> {
    Ok(sha1_id(&encode_value(v)?))
}

/// Target of a mutable item: SHA-1 of the public key followed by the salt
pub fn mutable_target(public_key: &[u8], salt: Option<&[u8]>) -> NodeId {
    let mut data = public_key.to_vec();
    if let Some(salt) = salt {
        data.extend_from_slice(salt);
    }
    sha1_id(&data)
}

/// The byte string a mutable item's signature covers
pub fn signable(salt: Option<&[u8]>, seq: i64, v: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if let Some(salt) = salt.filter(|s| !s.is_empty()) {
        out.extend_from_slice(format!("4:salt{}:", salt.len()).as_bytes());
        out.extend_from_slice(salt);
    }
    out.extend_from_slice(format!("3:seqi{}e1:v", seq).as_bytes());
    out.extend_from_slice(&encode_value(v)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_target_reference() {
        // "12:Hello World!" from the BEP 44 test vectors
        let v = Value::Bytes(b"Hello World!".to_vec());
        assert_eq!(
            immutable_target(&v).unwrap().to_hex(),
            "e5f96f6f38320f0f33959cb4d3d656452117aadb"
        );
    }

    #[test]
    fn test_signable_without_salt() {
        let v = Value::Bytes(b"Hello World!".to_vec());
        assert_eq!(
            signable(None, 1, &v).unwrap(),
            b"3:seqi1e1:v12:Hello World!".to_vec()
        );
        assert_eq!(signable(Some(b""), 1, &v).unwrap(), signable(None, 1, &v).unwrap());
    }

    #[test]
    fn test_signable_with_salt() {
        let v = Value::Bytes(b"Hello World!".to_vec());
        assert_eq!(
            signable(Some(b"foobar"), 1, &v).unwrap(),
            b"4:salt6:foobar3:seqi1e1:v12:Hello World!".to_vec()
        );
    }

    #[test]
    fn test_mutable_target_depends_on_salt() {
        let key = [3u8; 32];
        assert_ne!(
            mutable_target(&key, None),
            mutable_target(&key, Some(b"foobar"))
        );
        assert_eq!(mutable_target(&key, None), mutable_target(&key, Some(b"")));
    }
}
