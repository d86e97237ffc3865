//! Overlapping-window text chunker.
//!
//! Splits raw textbook text into fixed-size character windows with a
//! configurable overlap between consecutive windows, the unit of retrieval
//! for the whole system. Offsets are measured in characters, not bytes, so
//! multi-byte text never splits mid-character.

/// Split text into overlapping character windows.
///
/// Each window holds up to `size` characters; consecutive windows share
/// `overlap` characters. The final window is whatever remains and may be
/// shorter. Whitespace-only windows are dropped. Empty input yields no
/// chunks.
///
/// `overlap` must be smaller than `size` (enforced by config validation).
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(overlap < size, "overlap must be smaller than chunk size");

    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + size).min(total);
        let window: String = chars[start..end].iter().collect();

        if !window.trim().is_empty() {
            chunks.push(window);
        }

        if end == total {
            break;
        }
        start = end - overlap;
    }

    chunks
}
