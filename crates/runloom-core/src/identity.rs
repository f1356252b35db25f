//! Step identity and version resolution.
//!
//! Every step occurrence gets a deterministic content hash over its id, its
//! version-stamped target, and the target's schema hashes. Replays compare
//! the recomputed hash against the recorded one: a mismatch means the
//! target's contract changed underneath a live run, which the engine
//! surfaces instead of silently replaying.

use runloom_types::target::{split_versioned, FunctionCatalog, VERSION_SEPARATOR};
use sha2::{Digest, Sha256};

/// Compute the identity hash of a step occurrence.
///
/// Fields are length-prefixed before hashing so no two distinct inputs can
/// collide by concatenation. Hex-encoded SHA-256.
pub fn compute_step_hash(
    step_id: &str,
    target_name: &str,
    input_schema_hash: &str,
    output_schema_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [step_id, target_name, input_schema_hash, output_schema_hash] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hex_encode(&hasher.finalize())
}

/// Stamp a target name with its concrete version.
///
/// Already-qualified names (`name@N`) pass through unchanged. Otherwise the
/// catalog's current (highest) version for the base name is appended; when
/// the catalog knows nothing about the name it is left unqualified.
pub fn stamp_version(target: &str, catalog: &FunctionCatalog) -> String {
    let (base, version) = split_versioned(target);
    if version.is_some() {
        return target.to_string();
    }
    match catalog.latest(base) {
        Some(meta) => format!("{base}{VERSION_SEPARATOR}{}", meta.version),
        None => {
            tracing::debug!(target_name = target, "no version metadata, leaving target unqualified");
            target.to_string()
        }
    }
}

/// Schema hashes for a (possibly stamped) target, empty when unknown.
pub fn schema_hashes(target: &str, catalog: &FunctionCatalog) -> (String, String) {
    match catalog.resolve(target) {
        Some(meta) => (
            meta.input_schema_hash.clone(),
            meta.output_schema_hash.clone(),
        ),
        None => (String::new(), String::new()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
