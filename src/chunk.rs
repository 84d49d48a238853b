//! Overlapping word-window text chunker.
//!
//! Splits body text into chunks by greedy word accumulation: words are
//! appended to a running buffer until the character budget is exceeded, then
//! the buffer is flushed and reseeded with a fixed number of trailing words
//! from the flushed chunk. Chunks are order-preserving and deterministic for
//! the same input and constants.
//!
//! The budget (500 chars) is conservative so that every chunk stays well
//! under embedding-provider token limits.

use crate::config::ChunkingConfig;

/// Split text into overlapping chunks. Empty or whitespace-only input yields
/// zero chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        if current_len + word.len() > config.chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));
            // Seed the next buffer with the trailing overlap words
            let start = current.len().saturating_sub(config.overlap_words);
            current = current[start..].to_vec();
            current_len = if current.is_empty() {
                0
            } else {
                current.iter().map(|w| w.len()).sum::<usize>() + current.len() - 1
            };
        }
        current.push(word);
        current_len += word.len() + 1;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, overlap_words: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap_words,
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("", &config(500, 5)).is_empty());
        assert!(chunk_text("   \n\t ", &config(500, 5)).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("one two three", &config(500, 5));
        assert_eq!(chunks, vec!["one two three".to_string()]);
    }

    #[test]
    fn test_chunks_overlap_by_trailing_words() {
        let words: Vec<String> = (0..40).map(|i| format!("word{:02}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, &config(60, 3));
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].split(' ').collect();
            let next: Vec<&str> = pair[1].split(' ').collect();
            let tail = &prev[prev.len() - 3..];
            assert_eq!(&next[..3], tail, "next chunk must start with prior tail");
        }
    }

    #[test]
    fn test_word_sequence_survives_reassembly() {
        let words: Vec<String> = (0..100).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let overlap = 5;
        let chunks = chunk_text(&text, &config(80, overlap));

        // Drop the overlap prefix of every chunk after the first, then splice.
        let mut reassembled: Vec<&str> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_words: Vec<&str> = chunk.split(' ').collect();
            let skip = if i == 0 { 0 } else { overlap };
            reassembled.extend(&chunk_words[skip..]);
        }
        let expected: Vec<&str> = text.split(' ').collect();
        assert_eq!(reassembled, expected);
    }

    #[test]
    fn test_deterministic() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let a = chunk_text(text, &config(20, 2));
        let b = chunk_text(text, &config(20, 2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_single_word_still_emitted() {
        let text = "tiny andthisisaveryveryverylongword end";
        let chunks = chunk_text(text, &config(10, 1));
        let all: String = chunks.join(" ");
        assert!(all.contains("andthisisaveryveryverylongword"));
    }
}
