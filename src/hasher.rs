use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::{
    error::{SummarizeError, invalid_input},
    types::WindowHash,
};

/// Derives the idempotency key of a window. Ids are deduplicated and sorted
/// before hashing so input order never leaks into the digest.
pub fn window_hash<I, S>(
    mode: &str,
    mode_version: u32,
    message_ids: I,
) -> Result<WindowHash, SummarizeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sorted: BTreeSet<String> = message_ids
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect();
    if sorted.is_empty() {
        return Err(invalid_input("cannot hash a window without message ids"));
    }

    let canonical = serde_json::json!({
        "mode": mode,
        "mode_version": mode_version,
        "message_ids": sorted,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    Ok(WindowHash::from_hex(format!("{:x}", digest)))
}
