//! Tessera Utils - Utility Functions
//!
//! Stable hashing used to place string shard keys. The hash must not depend
//! on the process or platform, so it is computed with xxHash3 over the
//! UTF-8 bytes of the key instead of std's randomized hasher.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use xxhash_rust::xxh3::xxh3_64;

// =============================================================================
// Hashing Functions
// =============================================================================

/// Compute a 64-bit hash of the given bytes using xxHash3.
#[inline]
pub fn hash64(data: &[u8]) -> u64 {
    xxh3_64(data)
}

/// Hash a string shard key.
#[inline]
pub fn key_hash(key: &str) -> u64 {
    hash64(key.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================
