//! File-name sanitization for names announced by remote peers.
//!
//! A receiver joins the announced name onto its storage directory.  Without
//! sanitization a name such as `../../etc/passwd` would escape that
//! directory.  The rules below produce a single path component on every
//! platform:
//!
//! 1. Control characters and the characters Windows forbids in file names
//!    (`< > : " / \ | ? *`) become `_`.  This removes every path separator.
//! 2. Names made only of dots (`.`, `..`) would still name a directory
//!    relative to the target, so each dot becomes `_`.
//! 3. Trailing spaces and dots are stripped (Windows silently drops them).
//! 4. An empty result becomes `unnamed`; the result is capped at 255 bytes.

/// Character substituted for every illegal character.
pub const PLACEHOLDER: char = '_';

/// Longest file name, in bytes, that common file systems accept.
pub const MAX_FILE_NAME_BYTES: usize = 255;

const FALLBACK_NAME: &str = "unnamed";

/// Returns a name that is safe to join onto a storage directory.
///
/// # Examples
///
/// ```rust
/// use commhub_core::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
/// assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
/// assert_eq!(sanitize_file_name(".."), "__");
/// ```
pub fn sanitize_file_name(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if is_illegal(c) { PLACEHOLDER } else { c })
        .collect();

    if !replaced.is_empty() && replaced.chars().all(|c| c == '.') {
        return PLACEHOLDER.to_string().repeat(replaced.len());
    }

    let trimmed = replaced.trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    truncate_on_char_boundary(trimmed, MAX_FILE_NAME_BYTES).to_string()
}

fn is_illegal(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
