//! 32-byte hash types for transactions and blocks.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DecodeError;

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

macro_rules! hash_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            /// Parse the 64-character hex form produced by `Display`.
            pub fn from_hex(s: &str) -> Result<Self, DecodeError> {
                let bytes = hex::decode(s).map_err(|e| DecodeError::Malformed(e.to_string()))?;
                let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
                    DecodeError::Malformed(format!("expected 32 bytes, got {}", v.len()))
                })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for b in &self.0[..4] {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "\u{2026})")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }
    };
}

hash_type!(
    /// A 32-byte transaction hash.
    TxHash
);

hash_type!(
    /// A 32-byte block hash, identifying a header in the chain.
    BlockHash
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_full_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let s = TxHash::new(bytes).to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("ab"));
        assert!(s.ends_with("01"));
    }

    #[test]
    fn hex_form_parses_back() {
        let h = TxHash::new(blake2b_256(b"tx"));
        assert_eq!(TxHash::from_hex(&h.to_string()).expect("valid hex"), h);
        assert!(TxHash::from_hex("abcd").is_err());
        assert!(TxHash::from_hex("zz").is_err());
    }

    #[test]
    fn debug_is_abbreviated() {
        let h = BlockHash::new([0xff; 32]);
        assert_eq!(format!("{h:?}"), "BlockHash(ffffffff\u{2026})");
    }

    #[test]
    fn blake2b_is_deterministic() {
        assert_eq!(blake2b_256(b"chain"), blake2b_256(b"chain"));
        assert_ne!(blake2b_256(b"chain"), blake2b_256(b"watch"));
    }
}
