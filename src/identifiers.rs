//! Turns arbitrary header text into database identifiers.
//!
//! Output identifiers match `[A-Z_][A-Z0-9_]*`, never exceed the configured
//! length, and are unique (case-insensitively) within one call.

use std::collections::HashSet;

use crate::error::LoadError;

pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 30;
/// Shortest length limit that still leaves room for placeholders and
/// collision suffixes.
pub const MIN_IDENTIFIER_LENGTH: usize = 8;

/// Sanitizes a full header row. The result has the same length and order as
/// `headers`.
pub fn sanitize_identifiers<S: AsRef<str>>(headers: &[S], max_len: usize) -> Vec<String> {
    let max_len = max_len.max(MIN_IDENTIFIER_LENGTH);
    let mut taken: HashSet<String> = HashSet::with_capacity(headers.len());
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = sanitize_identifier(header.as_ref(), max_len)
                .unwrap_or_else(|| truncate(format!("COL_{}", idx + 1), max_len));
            let unique = dedupe(&base, max_len, &taken);
            taken.insert(unique.clone());
            unique
        })
        .collect()
}

/// Sanitizes a single identifier, returning `None` when nothing usable
/// survives (empty input or no ASCII alphanumeric characters).
pub fn sanitize_identifier(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if !trimmed.chars().any(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let mut name: String = trimmed
        .chars()
        .map(|c| match c {
            'a'..='z' => c.to_ascii_uppercase(),
            'A'..='Z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    Some(truncate(name, max_len.max(1)))
}

/// Sanitizes the destination table name with the same rules as columns.
pub fn sanitize_table_name(raw: &str, max_len: usize) -> Result<String, LoadError> {
    sanitize_identifier(raw, max_len.max(MIN_IDENTIFIER_LENGTH))
        .ok_or_else(|| LoadError::InvalidTableName(raw.to_string()))
}

pub fn is_valid_identifier(name: &str, max_len: usize) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= max_len
        && (first.is_ascii_uppercase() || first == '_')
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn dedupe(base: &str, max_len: usize, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2usize..)
        .map(|n| {
            let suffix = format!("_{n}");
            let keep = max_len.saturating_sub(suffix.len());
            format!("{}{}", &base[..base.len().min(keep)], suffix)
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn truncate(mut name: String, max_len: usize) -> String {
    // identifiers are ASCII by construction so byte truncation is safe
    name.truncate(max_len);
    name
}
