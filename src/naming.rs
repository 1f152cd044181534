//! Name sanitization and human-readable size formatting.
//!
//! Every directory and file name derived from remote content passes through
//! [`path_component`] (or [`sanitize`] for names whose length is not capped)
//! before it touches the filesystem.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Maximum length of a section, module, or discussion directory name.
pub const MAX_COMPONENT_LEN: usize = 50;

/// Prefix of the placeholder used when a name sanitizes to nothing.
const PLACEHOLDER_PREFIX: &str = "unnamed-";

/// Number of hex characters of the name digest kept in placeholders.
const PLACEHOLDER_HASH_LEN: usize = 8;

const SIZE_PREFIXES: [&str; 8] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ' | '(' | ')')
}

/// Reduces `name` to a portable subset of ASCII.
///
/// The input is NFKD-decomposed first, so accented letters keep their base
/// letter (`é` becomes `e`). Only ASCII letters, digits, `-`, `_`, `.`, space
/// and parentheses survive, in their original order.
///
/// # Example
///
/// ```
/// use cms_scraper_core::naming::sanitize;
///
/// assert_eq!(sanitize("Café: Week 1/2"), "Cafe Week 12");
/// assert_eq!(sanitize(&sanitize("Café: Week 1/2")), "Cafe Week 12");
/// ```
#[must_use]
pub fn sanitize(name: &str) -> String {
    name.nfkd().filter(|c| is_allowed(*c)).collect()
}

/// Builds a single path component from a remote display name.
///
/// The name is sanitized, cut to `max_len` characters when a limit is given,
/// and trimmed. Results that would be empty or consist only of dots (`.`,
/// `..`) are replaced by `unnamed-<hash>`, where the hash is derived from the
/// original name so distinct names stay distinct.
#[must_use]
pub fn path_component(name: &str, max_len: Option<usize>) -> String {
    let sanitized = sanitize(name);
    let cut: String = match max_len {
        Some(limit) => sanitized.chars().take(limit).collect(),
        None => sanitized,
    };
    let trimmed = cut.trim();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return placeholder(name);
    }
    trimmed.to_string()
}

/// Directory component for sections, modules and discussions.
#[must_use]
pub fn dir_component(name: &str) -> String {
    path_component(name, Some(MAX_COMPONENT_LEN))
}

fn placeholder(original: &str) -> String {
    let digest = Sha256::digest(original.as_bytes());
    let hex: String = digest
        .iter()
        .take(PLACEHOLDER_HASH_LEN / 2)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("{PLACEHOLDER_PREFIX}{hex}")
}

/// Splits `file_name` into stem and extension (extension keeps its dot).
///
/// A leading dot does not start an extension: `.bashrc` has no extension.
#[must_use]
pub fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
        _ => (file_name, ""),
    }
}

/// Formats a byte count as a base-1024 string, e.g. `1.5KiB`.
///
/// Used for log output only.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn humanize_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for prefix in SIZE_PREFIXES {
        if value < 1024.0 {
            return format!("{value:.1}{prefix}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}YiB")
}
