//! Filename sanitization utilities.
//!
//! Document names come from the analysis collaborator and are untrusted: they
//! may contain directory separators, traversal sequences or characters that are
//! invalid on some platforms. Everything written to disk goes through
//! [`sanitize_document_name`] first.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Extension every packaged document carries.
pub const DOCUMENT_EXTENSION: &str = ".md";

/// Longest stem kept for a document name (leaves room for suffixes).
const MAX_STEM_CHARS: usize = 180;

/// Sanitize a string for use in filenames across all platforms.
///
/// This function:
/// 1. Replaces control characters and Windows invalid characters with underscores
/// 2. Collapses consecutive replacements into one
/// 3. Trims leading/trailing spaces and dots
/// 4. Prefixes Windows reserved names with an underscore
/// 5. Returns "unnamed" if the result would be empty
///
/// # Examples
///
/// ```
/// use repodoc::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "unnamed".to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

/// Turn a logical document name into a flat, safe file name ending in `.md`.
///
/// Traversal sequences (`..`) are removed and directory separators are
/// flattened to `_`, so the result always names a file directly inside the
/// directory it is joined onto.
///
/// ```
/// use repodoc::utils::filename::sanitize_document_name;
///
/// assert_eq!(sanitize_document_name("../../etc/passwd"), "__etc_passwd.md");
/// assert_eq!(sanitize_document_name("src/main.py"), "src_main.py.md");
/// assert_eq!(sanitize_document_name("README.md"), "README.md");
/// ```
pub fn sanitize_document_name(name: &str) -> String {
    let flattened = name.replace("..", "").replace(['/', '\\'], "_");
    let mut safe = sanitize_filename(&flattened);

    let has_extension = safe.to_ascii_lowercase().ends_with(DOCUMENT_EXTENSION);
    let stem_len = if has_extension {
        safe.len() - DOCUMENT_EXTENSION.len()
    } else {
        safe.len()
    };

    if safe[..stem_len].chars().count() > MAX_STEM_CHARS {
        let cut = safe
            .char_indices()
            .nth(MAX_STEM_CHARS)
            .map(|(idx, _)| idx)
            .unwrap_or(stem_len);
        safe.truncate(cut);
        return format!("{safe}{DOCUMENT_EXTENSION}");
    }

    if !has_extension {
        safe.push_str(DOCUMENT_EXTENSION);
    }
    safe
}

/// Insert `_{n}` before the extension of a sanitized document name.
///
/// The extension match is case-insensitive and its original case is kept.
pub fn with_collision_suffix(name: &str, n: usize) -> String {
    let ext_len = DOCUMENT_EXTENSION.len();
    let has_extension = name.len() >= ext_len
        && name.is_char_boundary(name.len() - ext_len)
        && name[name.len() - ext_len..].eq_ignore_ascii_case(DOCUMENT_EXTENSION);

    if has_extension {
        let (stem, ext) = name.split_at(name.len() - ext_len);
        format!("{stem}_{n}{ext}")
    } else {
        format!("{name}_{n}{DOCUMENT_EXTENSION}")
    }
}
