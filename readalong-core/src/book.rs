//! Parsed book content delivered by the content parser.
//!
//! A book is a finite, ordered sequence of sentences, each carrying the
//! visual-description fragments and narrative-element references extracted
//! from its text. Sentences may arrive all at once or progressively during a
//! session; either way sequence numbers must strictly increase.

use crate::model::SentenceRef;
use crate::narrative::ElementRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from building or loading a book.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sentence {seq} is not after the last sentence {last}")]
    OutOfOrder { seq: u64, last: u64 },
}

/// Identifier of a book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Create a book id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One narrated sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub reference: SentenceRef,
    #[serde(default)]
    pub text: String,
    /// Visual-description fragments, in narrative order.
    #[serde(default)]
    pub fragments: Vec<String>,
    /// Narrative elements mentioned by the sentence.
    #[serde(default)]
    pub elements: Vec<ElementRef>,
}

impl Sentence {
    /// Create a sentence with no fragments or elements.
    pub fn new(reference: SentenceRef, text: impl Into<String>) -> Self {
        Self {
            reference,
            text: text.into(),
            fragments: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Add a visual fragment.
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    /// Add an element reference.
    pub fn with_element(mut self, element: ElementRef) -> Self {
        self.elements.push(element);
        self
    }

    /// Number of words, used to estimate narration length.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// A book as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(with = "sentence_list")]
    sentences: BTreeMap<u64, Sentence>,
}

impl Book {
    /// Create an empty book.
    pub fn new(id: BookId) -> Self {
        Self {
            id,
            title: None,
            sentences: BTreeMap::new(),
        }
    }

    /// Create a book from an ordered list of sentences.
    pub fn from_sentences(id: BookId, sentences: Vec<Sentence>) -> Result<Self, BookError> {
        let mut book = Self::new(id);
        book.append(sentences)?;
        Ok(book)
    }

    /// Load a book from a JSON file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BookError> {
        let content = fs::read_to_string(path).await?;
        let book: Book = serde_json::from_str(&content)?;
        Ok(book)
    }

    /// Append sentences delivered by the parser.
    ///
    /// Fails without modifying the book if any sentence does not strictly
    /// follow its predecessor.
    pub fn append(&mut self, sentences: Vec<Sentence>) -> Result<usize, BookError> {
        let mut last = self.last_seq();
        for sentence in &sentences {
            let seq = sentence.reference.seq;
            if let Some(prev) = last {
                if seq <= prev {
                    return Err(BookError::OutOfOrder { seq, last: prev });
                }
            }
            last = Some(seq);
        }
        let count = sentences.len();
        for sentence in sentences {
            self.sentences.insert(sentence.reference.seq, sentence);
        }
        Ok(count)
    }

    /// Look up a sentence by sequence number.
    pub fn sentence(&self, seq: u64) -> Option<&Sentence> {
        self.sentences.get(&seq)
    }

    /// Sentences whose sequence number falls in the range.
    pub fn range(&self, range: RangeInclusive<u64>) -> impl Iterator<Item = &Sentence> {
        self.sentences.range(range).map(|(_, s)| s)
    }

    /// All sentences in order.
    pub fn sentences(&self) -> impl Iterator<Item = &Sentence> {
        self.sentences.values()
    }

    /// First sentence, if any.
    pub fn first(&self) -> Option<&Sentence> {
        self.sentences.values().next()
    }

    /// Sequence number of the last known sentence.
    pub fn last_seq(&self) -> Option<u64> {
        self.sentences.keys().next_back().copied()
    }

    /// Number of sentences.
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    /// Whether the book has no sentences yet.
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Serialize the sentence map as a plain ordered list.
mod sentence_list {
    use super::Sentence;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(map: &BTreeMap<u64, Sentence>, serializer: S) -> Result<S::Ok, S::Error> {
        let list: Vec<&Sentence> = map.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<u64, Sentence>, D::Error> {
        let list = Vec::<Sentence>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for sentence in list {
            let seq = sentence.reference.seq;
            if map.insert(seq, sentence).is_some() {
                return Err(serde::de::Error::custom(format!("duplicate sentence sequence {seq}")));
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::ElementKind;

    fn sentence(seq: u64) -> Sentence {
        Sentence::new(SentenceRef::at(seq), "Call me Ishmael.")
    }

    #[test]
    fn test_append_rejects_regression() {
        let mut book = Book::from_sentences(BookId::new("b"), vec![sentence(1), sentence(2)]).unwrap();
        let err = book.append(vec![sentence(3), sentence(2)]).unwrap_err();
        assert!(matches!(err, BookError::OutOfOrder { seq: 2, last: 3 }));
        // Nothing from the rejected batch was applied.
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_range_lookup() {
        let book = Book::from_sentences(BookId::new("b"), (0..10).map(sentence).collect()).unwrap();
        let seqs: Vec<u64> = book.range(3..=5).map(|s| s.reference.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(book.last_seq(), Some(9));
    }

    #[test]
    fn test_json_roundtrip_keeps_order() {
        let book = Book::from_sentences(
            BookId::new("moby"),
            vec![
                sentence(0).with_fragment("a grey harbor town"),
                sentence(1).with_element(ElementRef::new(ElementKind::Character, "Ishmael")),
            ],
        )
        .unwrap();

        let json = serde_json::to_string(&book).unwrap();
        let parsed: Book = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.sentence(1).unwrap().elements[0].name, "Ishmael");
    }

    #[test]
    fn test_word_count() {
        assert_eq!(sentence(0).word_count(), 3);
    }
}
