//! Key layout and tier-prefix policy
//!
//! Layout:
//! - final objects: `{tier}/{user_id}/{uuid}/{sanitized-filename}`
//! - proxied temp chunks: `temp/{session_id}/chunk_{index}`
//!
//! A key's provenance decides its shape: keys handed out by a provider are
//! fully qualified, keys minted at session init are bare. `qualify` accepts
//! both and never stacks a second prefix on an already-qualified key.

use uuid::Uuid;

use super::StorageTier;

/// Tier encoded in a fully qualified key, if any
pub fn tier_of(key: &str) -> Option<StorageTier> {
    if let Some(rest) = key.strip_prefix("hot/") {
        (!rest.is_empty()).then_some(StorageTier::Hot)
    } else if let Some(rest) = key.strip_prefix("cold/") {
        (!rest.is_empty()).then_some(StorageTier::Cold)
    } else {
        None
    }
}

/// Key with any tier prefix removed
pub fn strip_tier(key: &str) -> &str {
    match tier_of(key) {
        Some(StorageTier::Hot) => &key["hot/".len()..],
        Some(StorageTier::Cold) => &key["cold/".len()..],
        None => key,
    }
}

/// Fully qualified key for `tier`. An already-qualified key is re-homed to
/// the requested tier, never double-prefixed.
pub fn qualify(key: &str, tier: StorageTier) -> String {
    format!("{}/{}", tier.prefix(), strip_tier(key))
}

/// Storage key for a new upload: `{user_id}/{uuid}/{sanitized-filename}`
pub fn object_key(user_id: &str, filename: &str) -> String {
    format!(
        "{}/{}/{}",
        sanitize_component(user_id),
        Uuid::new_v4(),
        sanitize_filename(filename)
    )
}

/// Temp key for one staged chunk
pub fn chunk_key(session_id: &str, index: u32) -> String {
    format!("{}/chunk_{}", chunk_prefix(session_id), index)
}

/// Temp prefix holding all of a session's staged chunks
pub fn chunk_prefix(session_id: &str) -> String {
    format!("temp/{}", sanitize_component(session_id))
}

/// Strip everything that could escape the key namespace from a path
/// component (separators, traversal, control characters)
pub fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
        .take(128)
        .collect()
}

/// Keep a filename readable while removing separators, traversal sequences,
/// and control characters; empty results fall back to "file"
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .replace("..", "_")
        .trim()
        .chars()
        .take(255)
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}
