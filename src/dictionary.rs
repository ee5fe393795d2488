use crate::GlossaryError;
use fst::Automaton;
use fst::automaton::Str;
use fst::{IntoStreamer, Map, Streamer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized lookup form of a term: trimmed and lowercased.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// A single glossary term as seen by the annotation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermEntry {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub tid: u32,
}

impl TermEntry {
    pub fn new(
        key: impl AsRef<str>,
        label: impl Into<String>,
        description: impl Into<String>,
        tid: u32,
    ) -> Self {
        Self {
            key: normalize_key(key.as_ref()),
            label: label.into(),
            description: description.into(),
            tid,
        }
    }

    /// Builds an entry keyed on its own label. Returns `None` for blank labels.
    pub fn from_label(tid: u32, label: &str, description: &str) -> Option<Self> {
        if label.trim().is_empty() {
            return None;
        }
        Some(Self::new(label, label, description, tid))
    }

    fn is_indexable(&self) -> bool {
        !self.key.is_empty() && !self.label.is_empty()
    }
}

/// Immutable key → term mapping backing one annotation pass.
///
/// Entries are stored in key order and addressed through an fst map from the
/// normalized key to the entry position.
pub struct TermDictionary {
    entries: Vec<TermEntry>,
    index: Map<Vec<u8>>,
}

impl TermDictionary {
    /// Builds a dictionary, dropping entries with an empty label or blank key.
    /// When two entries share a key the later one wins.
    pub fn from_entries<I>(entries: I) -> Result<Self, GlossaryError>
    where
        I: IntoIterator<Item = TermEntry>,
    {
        let mut by_key: BTreeMap<String, TermEntry> = BTreeMap::new();
        for mut entry in entries {
            entry.key = normalize_key(&entry.key);
            if !entry.is_indexable() {
                continue;
            }
            by_key.insert(entry.key.clone(), entry);
        }
        let entries: Vec<TermEntry> = by_key.into_values().collect();
        let index = Map::from_iter(
            entries
                .iter()
                .enumerate()
                .map(|(pos, entry)| (entry.key.as_bytes(), pos as u64)),
        )?;
        Ok(Self { entries, index })
    }

    pub fn empty() -> Result<Self, GlossaryError> {
        Self::from_entries(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact lookup by an already-normalized key.
    pub fn get(&self, key: &str) -> Option<&TermEntry> {
        self.index
            .get(key)
            .and_then(|pos| self.entries.get(pos as usize))
    }

    /// Lookup of raw text as it appears in a document.
    pub fn lookup(&self, text: &str) -> Option<&TermEntry> {
        self.get(&normalize_key(text))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TermEntry> + '_ {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|entry| entry.key.as_str())
    }

    pub fn contains_tid(&self, tid: u32) -> bool {
        self.entries.iter().any(|entry| entry.tid == tid)
    }

    /// Returns up to `limit` entries whose key starts with the provided prefix.
    pub fn prefix(&self, prefix: &str, limit: usize) -> Vec<&TermEntry> {
        let normalized = normalize_key(prefix);
        let automaton = Str::new(&normalized).starts_with();
        let mut stream = self.index.search(automaton).into_stream();
        let mut results = Vec::new();
        while let Some((_, pos)) = stream.next() {
            if results.len() >= limit {
                break;
            }
            if let Some(entry) = self.entries.get(pos as usize) {
                results.push(entry);
            }
        }
        results
    }
}

impl std::fmt::Debug for TermDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermDictionary")
            .field("entries", &self.entries)
            .finish()
    }
}
