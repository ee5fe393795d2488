use crate::annotate::annotate;
use crate::markup::{DEFAULT_EXCLUDED_TAGS, DocumentTree, ExclusionScope, MarkupWalker};
use crate::matcher::DEFAULT_SIZE_LIMIT;
use crate::{CompiledMatcher, GlossaryError, MatcherBuilder, TermDictionary};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client asset the host must attach for the tooltips to become interactive.
pub const TOOLTIP_LIBRARY: &str = "glossary_tooltip/glossary_tooltip";
pub const CACHE_TAG_PREFIX: &str = "taxonomy_term:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub excluded_tags: Vec<String>,
    pub exclusion_scope: ExclusionScope,
    pub size_limit: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_tags: DEFAULT_EXCLUDED_TAGS.iter().map(|s| s.to_string()).collect(),
            exclusion_scope: ExclusionScope::Parent,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

impl FilterConfig {
    fn walker(&self) -> MarkupWalker {
        MarkupWalker::new(&self.excluded_tags, self.exclusion_scope)
    }

    fn builder(&self) -> MatcherBuilder {
        MatcherBuilder::new().size_limit(self.size_limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutput {
    pub html: String,
    pub used_term_ids: BTreeSet<u32>,
    pub attachments: Vec<String>,
}

impl FilterOutput {
    fn unchanged(html: &str) -> Self {
        Self {
            html: html.to_string(),
            used_term_ids: BTreeSet::new(),
            attachments: Vec::new(),
        }
    }

    /// Invalidation tags for every term that ended up in the output.
    pub fn cache_tags(&self) -> Vec<String> {
        self.used_term_ids
            .iter()
            .map(|tid| format!("{CACHE_TAG_PREFIX}{tid}"))
            .collect()
    }

    pub fn is_annotated(&self) -> bool {
        !self.used_term_ids.is_empty()
    }
}

/// A dictionary compiled for repeated annotation passes.
///
/// The matcher is immutable, so one filter can serve many documents at once.
pub struct GlossaryFilter {
    dictionary: Arc<TermDictionary>,
    matcher: CompiledMatcher,
    walker: MarkupWalker,
}

impl GlossaryFilter {
    pub fn new(dictionary: Arc<TermDictionary>, config: &FilterConfig) -> Result<Self, GlossaryError> {
        let matcher = config.builder().build(&dictionary)?;
        Ok(Self {
            dictionary,
            matcher,
            walker: config.walker(),
        })
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    pub fn process(&self, html: &str) -> FilterOutput {
        run_pass(html, &self.dictionary, &self.matcher, &self.walker)
    }

    /// Annotates each document independently, in parallel, sharing the matcher.
    pub fn process_batch<S>(&self, documents: &[S]) -> Vec<FilterOutput>
    where
        S: AsRef<str> + Sync,
    {
        documents
            .par_iter()
            .map(|html| self.process(html.as_ref()))
            .collect()
    }
}

/// One-shot annotation with a freshly compiled matcher.
///
/// A dictionary the regex engine cannot compile leaves the input untouched.
pub fn process(html: &str, dictionary: &TermDictionary, config: &FilterConfig) -> FilterOutput {
    if dictionary.is_empty() {
        return FilterOutput::unchanged(html);
    }
    match config.builder().build(dictionary) {
        Ok(matcher) => run_pass(html, dictionary, &matcher, &config.walker()),
        Err(err) => {
            warn!(error = %err, terms = dictionary.len(), "term matcher unavailable, skipping annotation");
            FilterOutput::unchanged(html)
        }
    }
}

fn run_pass(
    html: &str,
    dictionary: &TermDictionary,
    matcher: &CompiledMatcher,
    walker: &MarkupWalker,
) -> FilterOutput {
    if matcher.is_empty() || html.trim().is_empty() {
        return FilterOutput::unchanged(html);
    }
    let mut document = DocumentTree::parse(html);
    if document.is_empty() {
        warn!(input_len = html.len(), "markup parsed to an empty tree, returning input");
        return FilterOutput::unchanged(html);
    }

    let regions = walker.select_text_regions(&document);
    let mut used_term_ids = BTreeSet::new();
    // Inserted annotation elements are written back exactly as rendered; the
    // tree serializer would leave `<` and `>` raw inside attribute values.
    let mut rendered = HashMap::new();
    let mut replaced = 0usize;
    for region in &regions {
        let Some(fragment) = annotate(region, matcher, dictionary) else {
            continue;
        };
        let parsed = DocumentTree::parse(&fragment.markup);
        if parsed.annotation_count() != fragment.annotation_count() {
            warn!(
                parent = region.parent_tag.as_deref().unwrap_or("-"),
                expected = fragment.annotation_count(),
                found = parsed.annotation_count(),
                "replacement fragment did not parse cleanly, leaving text as-is"
            );
            continue;
        }
        let Some(inserted) = document.splice_fragment(region.node, &parsed) else {
            warn!(
                parent = region.parent_tag.as_deref().unwrap_or("-"),
                "text node could not be replaced, leaving text as-is"
            );
            continue;
        };
        let annotations = inserted
            .into_iter()
            .filter(|node| document.is_annotation(*node));
        rendered.extend(annotations.zip(fragment.elements));
        used_term_ids.extend(fragment.term_ids);
        replaced += 1;
    }

    debug!(
        regions = regions.len(),
        replaced,
        terms = used_term_ids.len(),
        "glossary pass complete"
    );
    if replaced == 0 {
        return FilterOutput::unchanged(html);
    }
    FilterOutput {
        html: document.to_html_with(&rendered),
        used_term_ids,
        attachments: vec![TOOLTIP_LIBRARY.to_string()],
    }
}
