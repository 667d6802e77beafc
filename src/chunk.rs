//! Overlapping window chunking for texts longer than the model context.
//!
//! Windows are measured in chars (Unicode scalar values), never bytes, so a
//! chunk boundary can not split a multi-byte character.

/// Overlap between consecutive windows used by the indexer.
pub const DEFAULT_OVERLAP_FRACTION: f32 = 0.1;

/// Split `text` into windows of at most `max_len` chars.
///
/// Consecutive windows share `round(overlap_fraction * max_len)` chars
/// (clamped to `max_len - 1`). When `max_len` is zero or the text already
/// fits, the text is returned unchanged as the only chunk.
///
/// # Example
/// ```
/// use semindex::chunk::chunk_text;
///
/// let chunks = chunk_text("abcdefghij", 4, 0.25);
/// assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
/// ```
#[must_use]
pub fn chunk_text(text: &str, max_len: usize, overlap_fraction: f32) -> Vec<String> {
    if max_len == 0 {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }

    let fraction = if overlap_fraction.is_nan() {
        0.0
    } else {
        overlap_fraction.clamp(0.0, 1.0)
    };
    let mut overlap = (f64::from(fraction) * max_len as f64).round() as usize;
    if overlap >= max_len {
        overlap = max_len - 1;
    }
    let step = max_len.saturating_sub(overlap).max(1);

    let mut chunks = Vec::with_capacity(chars.len() / step + 1);
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_len).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}
