//! Answer confidence heuristic.
//!
//! Combines the top chunk's similarity score, the number of retrieved
//! chunks, and the response length into a bounded estimate. This is a
//! heuristic, not a calibrated probability: the index's raw similarity is
//! used directly as the base factor with no normalization across distance
//! metrics, and the only guarantee is that the result stays in `[0, 1]`.

use crate::models::RetrievedChunk;

/// Base score assumed when the index reports no similarity.
const DEFAULT_BASE: f64 = 0.5;

/// Response length (characters) at which the length factor saturates.
const FULL_LENGTH_CHARS: f64 = 200.0;

/// Score a response against the evidence that produced it.
///
/// Returns exactly `0.0` for an empty chunk list — no evidence means zero
/// confidence, before any other factor is considered. Otherwise:
///
/// ```text
/// base          = chunks[0].score            (0.5 when absent)
/// chunk_factor  = 1.0 if ≥3 chunks, 0.8 if 2, 0.6 if 1
/// length_factor = min(chars(response) / 200, 1.0)
/// score         = clamp(base × chunk_factor × length_factor, 0.0, 1.0)
/// ```
pub fn score(chunks: &[RetrievedChunk], response_text: &str) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }

    let base = chunks[0].score.map(f64::from).unwrap_or(DEFAULT_BASE);

    let chunk_factor = match chunks.len() {
        n if n >= 3 => 1.0,
        2 => 0.8,
        _ => 0.6,
    };

    let length_factor = (response_text.chars().count() as f64 / FULL_LENGTH_CHARS).min(1.0);

    (base * chunk_factor * length_factor).clamp(0.0, 1.0)
}
