//! Password to key derivation
//!
//! The classic `EVP_BytesToKey` expansion with MD5 and a single round, as
//! used by every Shadowsocks implementation for password based methods:
//!
//! ```text
//! D_0 = MD5(password)
//! D_i = MD5(D_{i-1} || password)
//! key = (D_0 || D_1 || ...)[..key_len]
//! ```

use md5::{Digest, Md5};

/// MD5 digest size in bytes
const DIGEST_LEN: usize = 16;

/// Derive a `key_len`-byte key from a password
///
/// Deterministic, and a shorter key is always a prefix of a longer one
/// derived from the same password. `key_len == 0` yields an empty key.
#[must_use]
pub fn derive_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len.div_ceil(DIGEST_LEN) * DIGEST_LEN);
    let mut prev: Option<[u8; DIGEST_LEN]> = None;

    while key.len() < key_len {
        let mut hasher = Md5::new();
        if let Some(prev) = prev {
            hasher.update(prev);
        }
        hasher.update(password);
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&hasher.finalize());

        key.extend_from_slice(&digest);
        prev = Some(digest);
    }

    key.truncate(key_len);
    key
}
