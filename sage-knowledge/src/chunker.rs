//! Recursive character splitter.
//!
//! Text is cut on the coarsest boundary that keeps pieces under the target
//! size (paragraph, then line, then sentence, then word) and the pieces are
//! greedily merged back into chunks that share a tail of `overlap` characters
//! with their predecessor. Sizes are measured in characters, not bytes.

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_with(text, SEPARATORS)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let Some(position) = separators.iter().position(|sep| text.contains(sep)) else {
            return self.hard_split(text);
        };
        let separator = separators[position];
        let finer = &separators[position + 1..];

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in text.split_inclusive(separator) {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }

            if finer.is_empty() {
                chunks.extend(self.hard_split(piece));
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Greedily pack pieces into chunks, carrying up to `overlap` characters
    /// of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_len = 0usize;

        for piece in pieces {
            let piece_len = char_len(piece);

            if window_len + piece_len > self.chunk_size && !window.is_empty() {
                chunks.push(window.concat());

                while !window.is_empty()
                    && (window_len > self.overlap || window_len + piece_len > self.chunk_size)
                {
                    window_len -= char_len(window[0]);
                    window.remove(0);
                }
            }

            window.push(piece);
            window_len += piece_len;
        }

        if !window.is_empty() {
            chunks.push(window.concat());
        }

        chunks
    }

    /// Fixed-size character windows for text with no usable boundary.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = TextChunker::new(1000, 200);
        let chunks = chunker.split("Paris is the capital of France.");
        assert_eq!(chunks, vec!["Paris is the capital of France.".to_string()]);
    }

    #[test]
    fn whitespace_yields_nothing() {
        let chunker = TextChunker::new(1000, 200);
        assert!(chunker.split("  \n\n\t ").is_empty());
        assert!(chunker.split("").is_empty());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let chunker = TextChunker::new(40, 0);
        let text = "First paragraph is here.\n\nSecond paragraph follows.";
        let chunks = chunker.split(text);
        assert_eq!(
            chunks,
            vec![
                "First paragraph is here.".to_string(),
                "Second paragraph follows.".to_string()
            ]
        );
    }

    #[test]
    fn chunks_respect_size_and_never_split_words() {
        let chunker = TextChunker::new(50, 10);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi \
                    omicron pi rho sigma tau upsilon phi chi psi omega";
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {chunk:?}");
            for word in chunk.split_whitespace() {
                assert!(text.split_whitespace().any(|w| w == word), "split word {word:?}");
            }
        }
    }

    #[test]
    fn neighbouring_chunks_overlap() {
        let chunker = TextChunker::new(30, 12);
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected {:?} to carry over into {:?}",
                last_word,
                pair[1]
            );
        }
    }

    #[test]
    fn unbroken_text_is_hard_split_by_characters() {
        let chunker = TextChunker::new(10, 2);
        let text = "ééééééééééééééééééééééé";
        let chunks = chunker.split(text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn overlap_is_clamped_below_size() {
        let chunker = TextChunker::new(5, 50);
        assert_eq!(chunker.overlap(), 4);
        assert_eq!(chunker.chunk_size(), 5);
    }
}
