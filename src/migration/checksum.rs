//! Checksum calculation for changesets

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of a changeset
///
/// Each file contributes its name relative to the changeset and its content,
/// in application order, so renaming, reordering or editing any file changes
/// the checksum.
pub fn changeset_checksum<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Compare a recorded checksum with the current one
pub fn checksums_match(recorded: &str, current: &str) -> bool {
    recorded.eq_ignore_ascii_case(current)
}
