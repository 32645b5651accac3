//! String hygiene for paths and log fields.
//!
//! Two concerns live here: turning service-provided names into safe path
//! components, and keeping full inbox paths out of log fields.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Maximum length, in characters, of a sanitized category directory name.
pub const MAX_CATEGORY_CHARS: usize = 64;

/// Maximum length, in characters, of a sanitized base filename.
pub const MAX_NAME_CHARS: usize = 120;

/// Byte cap for any single component. File systems limit names to 255
/// bytes; the rest is left for a `_NNNN` suffix and the extension.
pub const MAX_COMPONENT_BYTES: usize = 200;

const UNSAFE_CHARS: [char; 9] = ['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Makes `raw` safe to use as a single path component.
///
/// Separators, reserved characters and control characters become `_`,
/// leading/trailing whitespace and dots are stripped, and the result is
/// capped at `max_chars` characters and `MAX_COMPONENT_BYTES` bytes, cut on
/// a character boundary. Returns `None` if nothing is left.
pub fn path_component(raw: &str, max_chars: usize) -> Option<String> {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let mut capped: String = trimmed.chars().take(max_chars).collect();
    truncate_bytes(&mut capped, MAX_COMPONENT_BYTES);
    // Capping can expose trailing whitespace or dots again.
    let capped = capped.trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    if capped.is_empty() || capped.chars().all(|c| c == '_') {
        None
    } else {
        Some(capped.to_string())
    }
}

fn truncate_bytes(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name, not the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let hash = hasher.finish();
    format!("{:016x}", hash)
}
