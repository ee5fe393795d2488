mod annotate;
mod dictionary;
mod filter;
mod markup;
mod matcher;
mod store;

#[cfg(feature = "web")]
pub mod web;

pub use annotate::{AnnotationSpan, Fragment, annotate, annotation_markup, find_spans, render_fragment};
pub use dictionary::{TermDictionary, TermEntry, normalize_key};
pub use filter::{
    CACHE_TAG_PREFIX, FilterConfig, FilterOutput, GlossaryFilter, TOOLTIP_LIBRARY, process,
};
pub use markup::{
    DEFAULT_EXCLUDED_TAGS, DocumentTree, ExclusionScope, MarkupWalker, TOOLTIP_CLASS, TextRegion,
};
pub use matcher::{
    CompiledMatcher, DEFAULT_SIZE_LIMIT, MatcherBuilder, TermMatch, TermMatches,
};
pub use store::{
    DEFAULT_CACHE_CAPACITY, GlossaryStore, MatcherCache, TermMapProvider, TermRecord,
    TermTranslation,
};

use std::fmt;

#[derive(Debug)]
pub enum GlossaryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Pattern(regex::Error),
    Index(fst::Error),
}

impl fmt::Display for GlossaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlossaryError::Io(err) => write!(f, "io error: {err}"),
            GlossaryError::Json(err) => write!(f, "invalid glossary data: {err}"),
            GlossaryError::Pattern(err) => write!(f, "term matcher failed to compile: {err}"),
            GlossaryError::Index(err) => write!(f, "term index failed to build: {err}"),
        }
    }
}

impl std::error::Error for GlossaryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GlossaryError::Io(err) => Some(err),
            GlossaryError::Json(err) => Some(err),
            GlossaryError::Pattern(err) => Some(err),
            GlossaryError::Index(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for GlossaryError {
    fn from(value: std::io::Error) -> Self {
        GlossaryError::Io(value)
    }
}

impl From<serde_json::Error> for GlossaryError {
    fn from(value: serde_json::Error) -> Self {
        GlossaryError::Json(value)
    }
}

impl From<regex::Error> for GlossaryError {
    fn from(value: regex::Error) -> Self {
        GlossaryError::Pattern(value)
    }
}

impl From<fst::Error> for GlossaryError {
    fn from(value: fst::Error) -> Self {
        GlossaryError::Index(value)
    }
}
