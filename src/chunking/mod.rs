//! Fixed-size transcript chunking.
//!
//! Transcripts are cut into pieces of at most `size` characters so each piece
//! fits a summarization request. Chunks are counted in `char`s, never split a
//! UTF-8 sequence, and concatenate back to the original text.

/// Split `text` into consecutive chunks of `size` characters.
///
/// The last chunk may be shorter. Empty text yields no chunks. A `size` of
/// zero is treated as one.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
