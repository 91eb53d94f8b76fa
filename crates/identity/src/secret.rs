use serde::{Deserialize, Serialize};

/// An encrypted secret as stored by the write side.
///
/// Projections never decrypt; they keep the ciphertext so the command side
/// can hand it back to whoever holds the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoValue {
    pub algorithm: String,
    pub key_id: String,
    pub crypted: Vec<u8>,
}

impl core::fmt::Debug for CryptoValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CryptoValue")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("crypted", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_ciphertext() {
        let v = CryptoValue {
            algorithm: "aes".into(),
            key_id: "k1".into(),
            crypted: b"top-secret".to_vec(),
        };
        let out = format!("{v:?}");
        assert!(out.contains("redacted"));
        assert!(!out.contains("116"));
    }
}
