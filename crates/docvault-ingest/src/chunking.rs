//! Fixed-size text chunking.
//!
//! Chunks are contiguous, non-overlapping and in input order; sizes count
//! Unicode scalar values, not bytes. Joining the chunks gives back the input.

use docvault_core::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Split `text` into chunks of `size` characters. The last chunk may be shorter.
pub fn chunk_text(text: &str, size: usize) -> Result<Vec<String>> {
    if size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".into()));
    }

    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_split() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_text(&text, 1024).unwrap();
        let lens: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lens, vec![1024, 1024, 452]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_empty_and_short() {
        assert!(chunk_text("", 10).unwrap().is_empty());
        assert_eq!(chunk_text("abc", 10).unwrap(), vec!["abc"]);
        assert_eq!(chunk_text("abcd", 2).unwrap(), vec!["ab", "cd"]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "ééééé";
        let chunks = chunk_text(text, 2).unwrap();
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(chunk_text("abc", 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_deterministic() {
        let text = "the same input always yields the same chunks";
        assert_eq!(chunk_text(text, 7).unwrap(), chunk_text(text, 7).unwrap());
    }
}
