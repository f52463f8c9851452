//! Recursive character splitter used to chunk documents before embedding.
//!
//! Text is split on the first separator that occurs in it, coarse to fine.
//! Pieces shorter than the chunk size are merged back together up to the
//! chunk size; longer pieces are split again with the remaining separators.
//! Separators stay attached to the start of the piece that follows them.

use crate::error::{AppError, Result};

pub const INGEST_CHUNK_SIZE: usize = 256;
pub const INGEST_CHUNK_OVERLAP: usize = 20;

const MARKDOWN_SEPARATORS: &[&str] = &[
    "\n## ",
    "\n### ",
    "\n#### ",
    "\n##### ",
    "\n###### ",
    "```\n\n",
    "\n\n***\n\n",
    "\n\n---\n\n",
    "\n\n___\n\n",
    "\n\n",
    "\n",
    " ",
    "",
];

#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Result<Self> {
        if chunk_overlap >= chunk_size {
            return Err(AppError::ConfigurationError(format!(
                "Cannot have chunk overlap ({}) >= chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn markdown(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, MARKDOWN_SEPARATORS)
    }

    /// The ingest configuration: markdown separators, 256 / 20
    pub fn for_ingest() -> Result<Self> {
        Self::markdown(INGEST_CHUNK_SIZE, INGEST_CHUNK_OVERLAP)
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (index, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[index + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut good_splits: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                if let Some(piece) = trimmed(piece) {
                    chunks.push(piece);
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            chunks.extend(self.merge_splits(&good_splits));
        }

        chunks
    }

    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0usize;

        for &split in splits {
            let len = char_len(split);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join(&current) {
                    docs.push(doc);
                }
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(split);
            total += len;
        }

        if let Some(doc) = join(&current) {
            docs.push(doc);
        }
        docs
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn trimmed(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn join(pieces: &std::collections::VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    trimmed(&joined)
}

/// Split before every occurrence of `separator`; an empty separator splits
/// into single characters. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, c)| &text[start..start + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces.into_iter().filter(|piece| !piece.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn short_text_is_one_trimmed_chunk() {
        let splitter = RecursiveCharacterTextSplitter::for_ingest().expect("splitter");
        assert_eq!(
            splitter.split_text("  Studio notes for episode 4.  \n"),
            vec!["Studio notes for episode 4.".to_string()]
        );
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let splitter = RecursiveCharacterTextSplitter::for_ingest().expect("splitter");
        assert!(splitter.split_text("   \n\n ").is_empty());
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let splitter = RecursiveCharacterTextSplitter::for_ingest().expect("splitter");
        let chunks = splitter.split_text(&numbered_words(300));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= INGEST_CHUNK_SIZE, "chunk too long: {}", chunk);
        }
        for pair in chunks.windows(2) {
            let first_word = pair[1].split(' ').next().expect("word");
            assert!(
                pair[0].split(' ').any(|word| word == first_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn splits_on_markdown_headings_first() {
        let splitter = RecursiveCharacterTextSplitter::markdown(40, 0).expect("splitter");
        let text = "# Show\nIntro line.\n## Cast\nLead actor.\n## Crew\nDirector.";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec![
                "# Show\nIntro line.\n## Cast\nLead actor.".to_string(),
                "## Crew\nDirector.".to_string(),
            ]
        );
    }

    #[test]
    fn long_unbroken_text_falls_back_to_characters() {
        let splitter = RecursiveCharacterTextSplitter::markdown(10, 2).expect("splitter");
        let chunks = splitter.split_text(&"x".repeat(25));
        assert!(chunks.iter().all(|chunk| chunk.len() <= 10));
        assert_eq!(chunks.first().map(String::len), Some(10));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(RecursiveCharacterTextSplitter::markdown(20, 20).is_err());
    }

    #[test]
    fn separator_stays_with_following_piece() {
        assert_eq!(split_keeping_separator("a b c", " "), vec!["a", " b", " c"]);
        assert_eq!(split_keeping_separator("héé", ""), vec!["h", "é", "é"]);
    }
}
