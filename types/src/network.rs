//! Network identifier.

use serde::{Deserialize, Serialize};

use crate::{BlockHash, BlockHeader};

/// Identifies which chain the listener follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Main,
    /// The public test network.
    Test,
    /// Local regression-test network.
    Regtest,
}

impl NetworkId {
    /// Default peer port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Main => 8333,
            Self::Test => 18333,
            Self::Regtest => 18444,
        }
    }

    /// Four magic bytes carried in the version handshake.
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Self::Main => [0xf9, 0xbe, 0xb4, 0xd9],
            Self::Test => [0x0b, 0x11, 0x09, 0x07],
            Self::Regtest => [0xfa, 0xbf, 0xb5, 0xda],
        }
    }

    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Test => "test",
            Self::Regtest => "regtest",
        }
    }

    /// Genesis header every header chain on this network starts from.
    pub fn genesis_header(&self) -> BlockHeader {
        let (time, bits, nonce) = match self {
            Self::Main => (1_231_006_505, 0x1d00ffff, 2_083_236_893),
            Self::Test => (1_296_688_602, 0x1d00ffff, 414_098_458),
            Self::Regtest => (1_296_688_602, 0x207fffff, 2),
        };
        BlockHeader {
            version: 1,
            prev_block: BlockHash::ZERO,
            merkle_root: [0u8; 32],
            time,
            bits,
            nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_headers_differ_per_network() {
        assert_ne!(
            NetworkId::Main.genesis_header().hash(),
            NetworkId::Regtest.genesis_header().hash()
        );
        assert!(NetworkId::Test.genesis_header().prev_block.is_zero());
    }
}
