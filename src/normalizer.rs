//! Text → cache filename.
//!
//! The key is built by literal substring replacement in a fixed order, then
//! given a `.wav` extension. The rules run in sequence over the whole string,
//! so a later rule sees the output of the earlier ones (but not the reverse):
//! `"°c"` expands to `"degrees celcius"` after spaces were already replaced,
//! and the space it introduces stays in the key.
//!
//! Two more steps keep the key a single file name inside the cache
//! directory: path separators become `_`, and a stem longer than
//! [`MAX_STEM_BYTES`] is cut at a char boundary and suffixed with a hash of
//! the full stem, so distinct long texts still get distinct keys.

use sha2::{Digest, Sha256};

/// Extension appended to every key.
pub const ARTIFACT_EXTENSION: &str = ".wav";

/// Longest stem kept verbatim. Leaves room for the hash suffix and the
/// extension under the usual 255-byte file name limit.
pub const MAX_STEM_BYTES: usize = 200;

/// Hex chars of the SHA-256 suffix on shortened keys.
const HASH_CHARS: usize = 16;

/// Replacement rules, applied top to bottom.
const RULES: [(&str, &str); 6] = [
    (" ", "-"),
    (".", "_"),
    ("!", ""),
    ("?", ""),
    ("°c", "degrees celcius"),
    (",", ""),
];

/// Applied after [`RULES`]; a key must never name another directory.
const SEPARATOR_RULES: [(&str, &str); 3] = [("/", "_"), ("\\", "_"), ("\0", "")];

/// Map input text to its cache key.
///
/// Total and deterministic. Empty input yields `".wav"`; rejecting empty text
/// is the caller's job. Not idempotent: normalizing a key again turns the
/// extension dot into `_`.
pub fn normalize(text: &str) -> String {
    let stem = RULES
        .iter()
        .chain(SEPARATOR_RULES.iter())
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to));
    let mut key = bound_length(stem);
    key.push_str(ARTIFACT_EXTENSION);
    key
}

fn bound_length(stem: String) -> String {
    if stem.len() <= MAX_STEM_BYTES {
        return stem;
    }
    let digest = hex::encode(Sha256::digest(stem.as_bytes()));

    let mut cut = MAX_STEM_BYTES;
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &stem[..cut], &digest[..HASH_CHARS])
}
