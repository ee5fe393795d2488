use crate::markup::{TOOLTIP_CLASS, TextRegion};
use crate::{CompiledMatcher, TermDictionary, TermEntry};
use askama::Html as HtmlEscaper;
use askama::MarkupDisplay;

/// One matched span of a text region. `term` is `None` when the matched text
/// does not resolve to a dictionary entry; such spans pass through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationSpan<'t, 'd> {
    pub start: usize,
    pub end: usize,
    pub matched: &'t str,
    pub term: Option<&'d TermEntry>,
}

/// Replacement markup for one text node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub markup: String,
    /// Term ids in the order their annotations appear.
    pub term_ids: Vec<u32>,
    /// Exact markup of each annotation element, parallel to `term_ids`.
    pub elements: Vec<String>,
}

impl Fragment {
    pub fn annotation_count(&self) -> usize {
        self.term_ids.len()
    }
}

/// Phase one: ordered, non-overlapping spans for `text`.
pub fn find_spans<'t, 'd>(
    text: &'t str,
    matcher: &CompiledMatcher,
    dictionary: &'d TermDictionary,
) -> Vec<AnnotationSpan<'t, 'd>> {
    matcher
        .find_iter(text)
        .map(|hit| AnnotationSpan {
            start: hit.start,
            end: hit.end,
            matched: hit.text,
            term: dictionary.lookup(hit.text),
        })
        .collect()
}

/// Phase two: markup for `text` with every resolved span wrapped.
///
/// `text` is decoded node content, so the pieces between annotations are
/// escaped once to keep their meaning when the markup is parsed back.
/// Returns `None` when no span resolved to a term.
pub fn render_fragment(text: &str, spans: &[AnnotationSpan<'_, '_>]) -> Option<Fragment> {
    if spans.iter().all(|span| span.term.is_none()) {
        return None;
    }
    let mut markup = String::with_capacity(text.len() + spans.len() * 96);
    let mut term_ids = Vec::new();
    let mut elements = Vec::new();
    let mut cursor = 0;
    for span in spans {
        push_escaped(&mut markup, &text[cursor..span.start]);
        match span.term {
            Some(term) => {
                let element = annotation_markup(term);
                markup.push_str(&element);
                elements.push(element);
                term_ids.push(term.tid);
            }
            None => push_escaped(&mut markup, span.matched),
        }
        cursor = span.end;
    }
    push_escaped(&mut markup, &text[cursor..]);
    Some(Fragment {
        markup,
        term_ids,
        elements,
    })
}

/// Runs both phases over one region.
pub fn annotate(
    region: &TextRegion,
    matcher: &CompiledMatcher,
    dictionary: &TermDictionary,
) -> Option<Fragment> {
    let spans = find_spans(&region.text, matcher, dictionary);
    if spans.is_empty() {
        return None;
    }
    render_fragment(&region.text, &spans)
}

/// `<span class="glossary-tooltip" data-tid=".." data-description="..">label</span>`
pub fn annotation_markup(term: &TermEntry) -> String {
    format!(
        "<span class=\"{TOOLTIP_CLASS}\" data-tid=\"{}\" data-description=\"{}\">{}</span>",
        term.tid,
        escaped(&term.description),
        escaped(&term.label),
    )
}

fn push_escaped(out: &mut String, value: &str) {
    if !value.is_empty() {
        out.push_str(&escaped(value).to_string());
    }
}

fn escaped(value: &str) -> MarkupDisplay<HtmlEscaper, &str> {
    MarkupDisplay::new_unsafe(value, HtmlEscaper)
}
