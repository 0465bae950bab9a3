//! The hash chain itself: computing and verifying an entry's own-hash.
//!
//! `own_hash = HMAC-SHA256(secret, signing_payload(entry))`, where
//! `signing_payload` folds in the previous entry's own-hash alongside the
//! entry's frozen fields (see `reaper_core::entry::LogEntry::signing_payload`).
//! The secret is rotated only out-of-band; this module never persists it.

use hmac::{Hmac, Mac};
use reaper_core::entry::LogEntry;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn compute_own_hash(secret: &[u8], entry: &LogEntry) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&entry.signing_payload());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison against a recomputed hash — guards against a
/// timing side-channel telling an attacker how many leading hex digits of
/// a forged hash they got right.
pub fn hash_matches(secret: &[u8], entry: &LogEntry) -> bool {
    let expected = compute_own_hash(secret, entry);
    let actual = entry.own_hash.as_bytes();
    expected.as_bytes().ct_eq(actual).into()
}
