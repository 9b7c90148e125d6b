//! Identifier helpers for the PostgreSQL backend.
//!
//! Index names are global per schema and capped at 63 bytes, so managed
//! indexes get a hashed physical name and keep their logical name as the index
//! comment.

use sha2::{Digest, Sha256};

// Domain separation so index hashes never collide with other uses.
const INDEX_DOMAIN: &[u8] = b"ENTIDX";

/// Deterministic physical name for a logical index on a collection.
pub fn physical_index_name(collection: &str, logical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(INDEX_DOMAIN);
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(logical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("ix_{}", &digest[..24])
}

pub fn validate_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    ident.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
