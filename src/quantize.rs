//! Float to int8 vector quantization.
//!
//! Each vector is scaled independently so its largest component maps to
//! +/-127. The transform is lossy and only used forward: stored vectors and
//! query vectors go through the same function, and cosine distance is
//! invariant to the per-vector scale.

/// Quantize an embedding into int8 components.
///
/// Components are scaled by `127 / max(|v|)`, rounded half away from zero and
/// clamped to `[-128, 127]`. A zero vector quantizes to a zero vector.
#[must_use]
pub fn quantize_embedding(input: &[f32]) -> Vec<i8> {
    let max_abs = input
        .iter()
        .map(|v| v.abs())
        .filter(|v| !v.is_nan())
        .fold(0.0_f32, f32::max);

    let scale = if max_abs > 0.0 { 127.0 / max_abs } else { 127.0 };

    input
        .iter()
        .map(|v| {
            let scaled = (v * scale).round();
            if scaled.is_nan() {
                0
            } else {
                scaled.clamp(-128.0, 127.0) as i8
            }
        })
        .collect()
}

/// Cosine similarity between two int8 vectors, in `[-1, 1]`.
///
/// Returns 0 when the lengths differ, either vector is empty or either has a
/// zero norm.
#[must_use]
pub fn cosine_similarity_int8(a: &[i8], b: &[i8]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0_i64, 0_i64, 0_i64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (i64::from(x), i64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0 || norm_b == 0 {
        return 0.0;
    }

    (dot as f64 / ((norm_a as f64).sqrt() * (norm_b as f64).sqrt())) as f32
}
