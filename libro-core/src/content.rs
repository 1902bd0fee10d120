//! Content collaborator seam.
//!
//! Verse text lives in an external store. The engine only needs ordered
//! verses for a range; `PassageContext` turns them into the reference,
//! text and Strong's annotations a provider prompt is built from.

use crate::{compute_content_hash, ContentError, VerseId, VerseRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One verse as served by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseText {
    pub id: VerseId,
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_with_strongs: Option<String>,
    #[serde(default)]
    pub strongs_numbers: Vec<String>,
}

/// Read access to verse text.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Ordered verses for `range`. `ContentError::NotFound` if any id in
    /// the range is absent.
    async fn fetch_verse_range(&self, range: VerseRange) -> Result<Vec<VerseText>, ContentError>;
}

/// Strong's concordance data attached to a passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongsAnnotation {
    pub text_with_strongs: String,
    pub numbers: Vec<String>,
}

/// Everything a provider needs to know about the passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageContext {
    pub range: VerseRange,
    /// Display reference, e.g. `John 3:16-18`.
    pub reference: String,
    pub text: String,
    pub strongs: Option<StrongsAnnotation>,
    /// Hex SHA-256 of `text`.
    pub digest: String,
}

impl PassageContext {
    pub fn assemble(range: VerseRange, verses: &[VerseText]) -> Result<Self, ContentError> {
        let (first, last) = match (verses.first(), verses.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ContentError::NotFound { verse_id: range.start }),
        };

        let text = verses
            .iter()
            .map(|v| v.text.trim())
            .collect::<Vec<_>>()
            .join(" ");

        let annotated: Vec<&str> = verses
            .iter()
            .filter_map(|v| v.text_with_strongs.as_deref())
            .collect();
        let strongs = if annotated.is_empty() {
            None
        } else {
            let mut seen = BTreeSet::new();
            let numbers = verses
                .iter()
                .flat_map(|v| v.strongs_numbers.iter())
                .filter(|n| seen.insert(n.as_str()))
                .cloned()
                .collect();
            Some(StrongsAnnotation {
                text_with_strongs: annotated.join(" "),
                numbers,
            })
        };

        Ok(Self {
            range,
            reference: format_reference(first, last),
            digest: hex::encode(compute_content_hash(text.as_bytes())),
            text,
            strongs,
        })
    }
}

/// `John 3:16`, `John 3:16-18`, `Genesis 1:31-2:3`, or a two-book span.
pub fn format_reference(first: &VerseText, last: &VerseText) -> String {
    if first.book != last.book {
        format!(
            "{} {}:{} - {} {}:{}",
            first.book, first.chapter, first.verse, last.book, last.chapter, last.verse
        )
    } else if first.chapter != last.chapter {
        format!(
            "{} {}:{}-{}:{}",
            first.book, first.chapter, first.verse, last.chapter, last.verse
        )
    } else if first.verse != last.verse {
        format!("{} {}:{}-{}", first.book, first.chapter, first.verse, last.verse)
    } else {
        format!("{} {}:{}", first.book, first.chapter, first.verse)
    }
}

// ============================================================================
// IN-MEMORY CONTENT SOURCE
// ============================================================================

/// Content source over a fixed set of verses.
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    verses: BTreeMap<VerseId, VerseText>,
    fetches: AtomicUsize,
}

impl InMemoryContentSource {
    pub fn new(verses: impl IntoIterator<Item = VerseText>) -> Self {
        Self {
            verses: verses.into_iter().map(|v| (v.id, v)).collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Load a JSON array of verses.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ContentError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ContentError::Unavailable {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let verses: Vec<VerseText> =
            serde_json::from_str(&json).map_err(|e| ContentError::Unavailable {
                reason: format!("{}: {}", path.display(), e),
            })?;
        Ok(Self::new(verses))
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.verses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verses.is_empty()
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn fetch_verse_range(&self, range: VerseRange) -> Result<Vec<VerseText>, ContentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if range.is_inverted() {
            return Err(ContentError::NotFound { verse_id: range.start });
        }
        range
            .ids()
            .map(|id| {
                self.verses
                    .get(&id)
                    .cloned()
                    .ok_or(ContentError::NotFound { verse_id: id })
            })
            .collect()
    }
}
