use serde::{Deserialize, Serialize};
use std::fmt;

/// A content digest produced by a [`ContentHasher`](crate::ContentHasher).
///
/// The length depends on the configured algorithm, so the bytes are kept in a
/// `Vec` rather than a fixed array.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub Vec<u8>);

impl Digest {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Digest(bytes.to_vec())
    }

    /// Hex-encode the full digest.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse a digest from its hex representation.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.is_empty() {
            return Err("empty digest".into());
        }
        Ok(Digest(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Digest({})", &hex[..hex.len().min(16)])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", &hex[..hex.len().min(16)])
    }
}
