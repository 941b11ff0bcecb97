//! Unicode-safe text utilities for message handling.

/// Truncate `text` to at most `max_chars` Unicode scalar values,
/// appending `suffix` if truncation occurred.
///
/// Uses `char_indices().nth(max_chars)` — compatible with MSRV 1.85.
/// Do NOT use `str::floor_char_boundary` (requires Rust 1.91).
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut result = text[..byte_idx].to_string();
            result.push_str(suffix);
            result
        }
        None => text.to_string(),
    }
}

/// Return a slice of `text` containing at most `max_chars` Unicode scalar values.
///
/// Uses `char_indices().nth(max_chars)` — compatible with MSRV 1.85.
pub fn truncate_chars_slice(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Validate message text before delivery.
///
/// Returns `Err` with a user-facing error message when:
/// - `text` contains null bytes (`\0`) — these corrupt JSON files
/// - `text.len()` (in bytes) exceeds `max_bytes`
///
/// # Errors
///
/// Returns `Err(String)` with a human-readable message on validation failure.
pub fn validate_message_text(text: &str, max_bytes: usize) -> Result<(), String> {
    if text.contains('\0') {
        return Err(
            "Message contains null bytes (\\0) which are not allowed. \
             Remove null bytes and retry."
                .to_string(),
        );
    }
    if text.len() > max_bytes {
        return Err(format!(
            "Message size ({} bytes) exceeds maximum allowed ({} bytes). \
             Consider using --file <path> for large payloads.",
            text.len(),
            max_bytes,
        ));
    }
    Ok(())
}

/// Default maximum message size in bytes (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_048_576;
