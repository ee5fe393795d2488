use crate::{FilterConfig, FilterOutput, GlossaryError, GlossaryFilter, TermDictionary, TermEntry};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Supplies the per-language dictionary for an annotation pass.
pub trait TermMapProvider {
    fn term_map(&self, langcode: &str) -> Result<TermDictionary, GlossaryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermTranslation {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// A glossary term as stored, with optional per-language translations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub tid: u32,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub translations: BTreeMap<String, TermTranslation>,
}

impl TermRecord {
    /// Label and description for `langcode`, falling back to the source record.
    pub fn localized(&self, langcode: &str) -> (&str, &str) {
        match self.translations.get(langcode) {
            Some(translation) => (translation.label.as_str(), translation.description.as_str()),
            None => (self.label.as_str(), self.description.as_str()),
        }
    }
}

/// In-memory glossary backed by a JSON array of [`TermRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct GlossaryStore {
    records: Vec<TermRecord>,
}

impl GlossaryStore {
    pub fn new(mut records: Vec<TermRecord>) -> Self {
        records.sort_by_key(|record| record.tid);
        Self { records }
    }

    pub fn from_json_str(json: &str) -> Result<Self, GlossaryError> {
        let records: Vec<TermRecord> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GlossaryError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let store = Self::from_json_str(&raw)?;
        info!(path = %path.display(), terms = store.records.len(), "loaded glossary");
        Ok(store)
    }

    pub fn records(&self) -> &[TermRecord] {
        &self.records
    }
}

impl TermMapProvider for GlossaryStore {
    fn term_map(&self, langcode: &str) -> Result<TermDictionary, GlossaryError> {
        let entries = self.records.iter().filter_map(|record| {
            let (label, description) = record.localized(langcode);
            TermEntry::from_label(record.tid, label, description)
        });
        TermDictionary::from_entries(entries)
    }
}

/// Compiled filters per language, evicted by term id when a term changes.
pub struct MatcherCache<P> {
    provider: P,
    config: FilterConfig,
    filters: Mutex<LruCache<String, Arc<GlossaryFilter>>>,
}

impl<P: TermMapProvider> MatcherCache<P> {
    pub fn new(provider: P, config: FilterConfig, capacity: NonZeroUsize) -> Self {
        Self {
            provider,
            config,
            filters: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_defaults(provider: P) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::new(provider, FilterConfig::default(), capacity)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the cached filter for `langcode`, compiling it on a miss.
    pub fn filter_for(&self, langcode: &str) -> Result<Arc<GlossaryFilter>, GlossaryError> {
        if let Some(filter) = self.filters.lock().get(langcode) {
            return Ok(Arc::clone(filter));
        }
        let dictionary = self.provider.term_map(langcode)?;
        debug!(langcode, terms = dictionary.len(), "compiling glossary filter");
        let filter = Arc::new(GlossaryFilter::new(Arc::new(dictionary), &self.config)?);
        self.filters
            .lock()
            .put(langcode.to_string(), Arc::clone(&filter));
        Ok(filter)
    }

    pub fn process(&self, html: &str, langcode: &str) -> Result<FilterOutput, GlossaryError> {
        Ok(self.filter_for(langcode)?.process(html))
    }

    /// Drops every cached language whose dictionary contains `tid`.
    pub fn invalidate_term(&self, tid: u32) -> usize {
        let mut filters = self.filters.lock();
        let stale: Vec<String> = filters
            .iter()
            .filter(|(_, filter)| filter.dictionary().contains_tid(tid))
            .map(|(langcode, _)| langcode.clone())
            .collect();
        for langcode in &stale {
            filters.pop(langcode);
        }
        if !stale.is_empty() {
            debug!(tid, evicted = stale.len(), "invalidated glossary filters");
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.filters.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GLOSSARY: &str = r#"[
        {"tid": 7, "label": "API", "description": "Application Programming Interface",
         "translations": {"es": {"label": "Interfaz", "description": "Interfaz de programación"}}},
        {"tid": 3, "label": "  Stem Cell ", "description": "Undifferentiated cell"},
        {"tid": 5, "label": "", "description": "never indexed"},
        {"tid": 8, "label": "Kernel",
         "translations": {"es": {"label": ""}}}
    ]"#;

    fn store() -> GlossaryStore {
        GlossaryStore::from_json_str(GLOSSARY).unwrap()
    }

    #[test]
    fn records_are_ordered_by_tid() {
        let tids: Vec<_> = store().records().iter().map(|r| r.tid).collect();
        assert_eq!(tids, vec![3, 5, 7, 8]);
    }

    #[test]
    fn term_map_uses_source_language_by_default() {
        let dict = store().term_map("en").unwrap();
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["api", "kernel", "stem cell"]);
        let api = dict.get("api").unwrap();
        assert_eq!(api.tid, 7);
        assert_eq!(api.description, "Application Programming Interface");
    }

    #[test]
    fn term_map_prefers_translations() {
        let dict = store().term_map("es").unwrap();
        let entry = dict.get("interfaz").unwrap();
        assert_eq!(entry.tid, 7);
        assert_eq!(entry.description, "Interfaz de programación");
        assert!(dict.get("api").is_none());
        // An empty translated label drops the term for that language.
        assert!(!dict.contains_tid(8));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            GlossaryStore::from_json_str("{not json"),
            Err(GlossaryError::Json(_))
        ));
    }

    struct CountingProvider {
        inner: GlossaryStore,
        calls: AtomicUsize,
    }

    impl TermMapProvider for CountingProvider {
        fn term_map(&self, langcode: &str) -> Result<TermDictionary, GlossaryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.term_map(langcode)
        }
    }

    fn cache() -> MatcherCache<CountingProvider> {
        MatcherCache::with_defaults(CountingProvider {
            inner: store(),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn filters_are_compiled_once_per_language() {
        let cache = cache();
        let first = cache.filter_for("en").unwrap();
        let second = cache.filter_for("en").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        cache.filter_for("es").unwrap();
        assert_eq!(cache.provider().calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidation_evicts_languages_holding_the_term() {
        let cache = cache();
        cache.filter_for("en").unwrap();
        cache.filter_for("es").unwrap();
        // Term 8 only exists in the English dictionary.
        assert_eq!(cache.invalidate_term(8), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_term(7), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_term(42), 0);
    }

    #[test]
    fn process_routes_through_language() {
        let cache = cache();
        let en = cache.process("<p>The API</p>", "en").unwrap();
        assert!(en.used_term_ids.contains(&7));
        let es = cache.process("<p>La interfaz</p>", "es").unwrap();
        assert!(es.html.contains(">Interfaz</span>"));
    }

    #[test]
    fn capacity_bounds_cached_languages() {
        let cache = MatcherCache::new(store(), FilterConfig::default(), NonZeroUsize::new(1).unwrap());
        cache.filter_for("en").unwrap();
        cache.filter_for("es").unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
