//! Block hashing for the linear-memory snapshot engine.
//!
//! The reference implementation hashes each memory block with BLAKE2b
//! truncated to 16 bytes; this is reproduced exactly here rather than
//! substituted with a faster general-purpose hash, since nothing downstream
//! depends on the digest being cryptographically sized — only on dirty
//! blocks being detected reliably.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

/// A truncated BLAKE2b digest identifying the content of one memory block.
pub type BlockDigest = [u8; 16];

/// Hash a single block of guest linear memory.
pub fn hash_block(block: &[u8]) -> BlockDigest {
    let mut hasher = Blake2bVar::new(16).expect("16 is a valid blake2b digest size");
    hasher.update(block);
    let mut out = [0u8; 16];
    hasher
        .finalize_variable(&mut out)
        .expect("output buffer matches requested digest size");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let data = b"a block of guest memory";
        assert_eq!(hash_block(data), hash_block(data));
    }

    #[test]
    fn distinguishes_inputs() {
        assert_ne!(hash_block(b"block a"), hash_block(b"block b"));
    }

    #[test]
    fn sixteen_bytes() {
        assert_eq!(hash_block(b"").len(), 16);
    }
}
