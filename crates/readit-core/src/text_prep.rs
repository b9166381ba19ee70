//! Text segmentation for TTS — bounded chunks cut at natural boundaries.
//!
//! Pure functions, no I/O. Lengths are counted in characters, not bytes,
//! so multi-byte text never gets cut inside a code point.

use regex::Regex;
use std::sync::LazyLock;

static RE_CURLY_SINGLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[‘’]").unwrap());
static RE_CURLY_DOUBLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[“”]").unwrap());
static RE_SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,;:!?])").unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Default maximum chunk length for [`split_into_chunks`].
pub const DEFAULT_MAX_CHUNK_LEN: usize = 400;

/// Characters that end a phrase strongly enough to cut after.
const BOUNDARIES: [char; 5] = ['.', '!', '?', '\n', ';'];

/// Split text into chunks of at most `max_len` characters.
///
/// Each window of `max_len` characters is cut after its last sentence
/// boundary (`.`, `!`, `?`, newline, `;`), else at its last space, else
/// hard at `max_len`. Pieces are trimmed and empty pieces dropped, so
/// empty or whitespace-only input yields no chunks. A tail that already
/// fits is kept whole.
pub fn split_into_chunks(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        let cut = match remaining.char_indices().nth(max_len) {
            // Fewer than max_len + 1 chars left: everything fits.
            None => remaining.len(),
            Some((window_end, _)) => cut_point(&remaining[..window_end]),
        };

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    chunks
}

/// Byte offset to cut `window` at. Always > 0 for a non-empty window.
fn cut_point(window: &str) -> usize {
    if let Some(pos) = window.rfind(BOUNDARIES) {
        // Boundary chars are ASCII, so +1 lands on a char boundary.
        return pos + 1;
    }
    match window.rfind(' ') {
        Some(pos) if pos > 0 => pos,
        _ => window.len(),
    }
}

/// Normalize text for comparing a chunked reading against its source.
///
/// Folds curly quotes to ASCII, drops whitespace in front of punctuation
/// and collapses whitespace runs to a single space.
pub fn normalize_for_comparison(text: &str) -> String {
    let c = RE_CURLY_SINGLE.replace_all(text, "'");
    let c = RE_CURLY_DOUBLE.replace_all(&c, "\"");
    let c = RE_SPACE_BEFORE_PUNCT.replace_all(&c, "$1");
    let c = RE_WHITESPACE.replace_all(&c, " ");
    c.trim().to_string()
}
