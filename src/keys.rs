//! Gossip encryption key material.
//!
//! The agent's keyring accepts only base64-encoded 16-byte keys. Operators
//! may configure either that exact form or a raw passphrase; passphrases
//! are stretched into key material with PBKDF2-HMAC-SHA256 using a fixed
//! salt and round count, so every node independently derives the same key
//! from the same passphrase.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

/// Gossip keys are 16 bytes of symmetric key material.
const KEY_LEN: usize = 16;

/// Fixed derivation parameters. Changing either would silently split the
/// cluster into nodes that derive different keys from the same passphrase.
const DERIVE_SALT: &[u8] = b"nodeboot-gossip-keyring";
const DERIVE_ROUNDS: u32 = 4096;

/// Normalize one configured key entry into installable key material.
///
/// Already-valid base64 16-byte keys pass through untouched; anything
/// else is treated as a passphrase and derived.
pub fn normalize_key(input: &str) -> String {
    if let Ok(raw) = BASE64.decode(input) {
        if raw.len() == KEY_LEN {
            return input.to_string();
        }
    }
    let mut derived = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(input.as_bytes(), DERIVE_SALT, DERIVE_ROUNDS, &mut derived);
    BASE64.encode(derived)
}

/// Normalize an ordered key list, preserving order. The first entry stays
/// first; callers rely on that to pick the primary key.
pub fn normalize_keys(keys: &[String]) -> Vec<String> {
    keys.iter().map(|k| normalize_key(k)).collect()
}

/// Short stable fingerprint for logging. Key material itself must never
/// reach the logs.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..4])
}

// ── Tests ───────────────────────────────────────────────────────────
