use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeMut, NodeRef};
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Tags whose direct text children are never annotated.
pub const DEFAULT_EXCLUDED_TAGS: [&str; 4] = ["a", "script", "style", "textarea"];

/// Raw-text and RCDATA containers. Their content serializes verbatim, so an
/// inserted element would come back as literal text.
const RAW_TEXT_TAGS: [&str; 10] = [
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes", "noscript",
    "plaintext",
];

/// Elements whose text children serialize without escaping.
const VERBATIM_TEXT_TAGS: [&str; 8] = [
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Elements that never get a closing tag.
const VOID_TAGS: [&str; 18] = [
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

pub const TOOLTIP_CLASS: &str = "glossary-tooltip";

/// How far up the tree the exclusion check looks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionScope {
    /// Only the immediate parent element is checked.
    #[default]
    Parent,
    /// Any enclosing element excludes the text.
    Ancestors,
}

/// A parsed HTML fragment. Nodes live in an arena and are addressed by
/// `NodeId`, so splicing never invalidates other handles.
pub struct DocumentTree {
    html: Html,
}

impl DocumentTree {
    /// Parses `fragment` leniently as body content. Never fails.
    pub fn parse(fragment: &str) -> Self {
        let html = Html::parse_fragment(fragment);
        if !html.errors.is_empty() {
            debug!(errors = html.errors.len(), "recovered from malformed markup");
        }
        Self { html }
    }

    pub fn is_empty(&self) -> bool {
        self.html.root_element().children().next().is_none()
    }

    /// Serializes the fragment without any document wrapper.
    pub fn to_html(&self) -> String {
        self.to_html_with(&HashMap::new())
    }

    /// Serializes the fragment, writing `overrides[id]` verbatim in place of
    /// the subtree rooted at `id`.
    ///
    /// Everything else is written the way html5ever writes it, which only
    /// escapes `&`, `"` and no-break spaces inside attribute values.
    pub fn to_html_with(&self, overrides: &HashMap<NodeId, String>) -> String {
        let root = self.html.root_element();
        let root_id = root.id();
        let mut out = String::new();
        let mut skipping: Option<NodeId> = None;
        for edge in root.traverse() {
            match edge {
                Edge::Open(node) if node.id() != root_id && skipping.is_none() => {
                    match overrides.get(&node.id()) {
                        Some(markup) => {
                            out.push_str(markup);
                            skipping = Some(node.id());
                        }
                        None => open_node(node, &mut out),
                    }
                }
                Edge::Close(node) if node.id() != root_id => {
                    if skipping == Some(node.id()) {
                        skipping = None;
                    } else if skipping.is_none() {
                        close_node(node, &mut out);
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// True when `node` is a tooltip `span` element.
    pub fn is_annotation(&self, node: NodeId) -> bool {
        self.html
            .tree
            .get(node)
            .and_then(|node| node.value().as_element())
            .is_some_and(is_annotation_element)
    }

    pub fn text_of(&self, node: NodeId) -> Option<&str> {
        self.html
            .tree
            .get(node)
            .and_then(|node| node.value().as_text())
            .map(|text| &**text)
    }

    /// Number of annotation elements anywhere in the fragment.
    pub fn annotation_count(&self) -> usize {
        self.html
            .root_element()
            .descendants()
            .filter_map(|node| node.value().as_element())
            .filter(|element| is_annotation_element(element))
            .count()
    }

    /// Replaces the text node `target` with the top-level nodes of `fragment`,
    /// keeping sibling order, and returns the ids of the inserted nodes.
    /// Returns `None` and leaves the tree untouched when the target is not an
    /// attached text node or the fragment is empty.
    pub fn splice_fragment(&mut self, target: NodeId, fragment: &DocumentTree) -> Option<Vec<NodeId>> {
        let source = fragment.html.root_element();
        source.children().next()?;
        match self.html.tree.get(target) {
            Some(node) if node.value().is_text() && node.parent().is_some() => {}
            _ => return None,
        }
        let mut ids = Vec::new();
        for child in source.children() {
            let mut anchor = self.html.tree.get_mut(target)?;
            let mut inserted = anchor.insert_before(child.value().clone());
            graft_children(&mut inserted, child);
            ids.push(inserted.id());
        }
        if let Some(mut node) = self.html.tree.get_mut(target) {
            node.detach();
        }
        Some(ids)
    }
}

fn is_annotation_element(element: &scraper::node::Element) -> bool {
    element.name() == "span"
        && element
            .attr("class")
            .is_some_and(|class| class.split_whitespace().any(|c| c == TOOLTIP_CLASS))
}

fn open_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype.name());
            out.push('>');
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        Node::Text(text) => {
            let verbatim = node
                .parent()
                .and_then(|parent| parent.value().as_element())
                .is_some_and(|parent| {
                    &*parent.name.ns == HTML_NS && VERBATIM_TEXT_TAGS.contains(&parent.name())
                });
            if verbatim {
                out.push_str(text);
            } else {
                push_escaped(out, text, false);
            }
        }
        Node::Element(element) => {
            out.push('<');
            out.push_str(element.name());
            for (name, value) in element.attrs.iter() {
                out.push(' ');
                match &*name.ns {
                    XML_NS => out.push_str("xml:"),
                    XMLNS_NS if &*name.local != "xmlns" => out.push_str("xmlns:"),
                    XLINK_NS => out.push_str("xlink:"),
                    _ => {}
                }
                out.push_str(&name.local);
                out.push_str("=\"");
                push_escaped(out, value, true);
                out.push('"');
            }
            out.push('>');
        }
        Node::Document | Node::Fragment | Node::ProcessingInstruction(_) => {}
    }
}

fn close_node(node: NodeRef<'_, Node>, out: &mut String) {
    if let Some(element) = node.value().as_element() {
        if &*element.name.ns == HTML_NS && VOID_TAGS.contains(&element.name()) {
            return;
        }
        out.push_str("</");
        out.push_str(element.name());
        out.push('>');
    }
}

fn push_escaped(out: &mut String, value: &str, attribute: bool) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{00A0}' => out.push_str("&nbsp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn graft_children(dest: &mut NodeMut<'_, Node>, source: NodeRef<'_, Node>) {
    for child in source.children() {
        let mut copy = dest.append(child.value().clone());
        graft_children(&mut copy, child);
    }
}

/// One eligible run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRegion {
    pub node: NodeId,
    pub text: String,
    pub parent_tag: Option<String>,
}

/// Selects the text nodes an annotation pass may rewrite.
#[derive(Debug, Clone)]
pub struct MarkupWalker {
    excluded: Vec<String>,
    scope: ExclusionScope,
}

impl Default for MarkupWalker {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_TAGS, ExclusionScope::Parent)
    }
}

impl MarkupWalker {
    pub fn new<I, S>(excluded: I, scope: ExclusionScope) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: excluded
                .into_iter()
                .map(|tag| tag.as_ref().trim().to_ascii_lowercase())
                .filter(|tag| !tag.is_empty())
                .collect(),
            scope,
        }
    }

    pub fn scope(&self) -> ExclusionScope {
        self.scope
    }

    /// Non-blank, non-excluded text nodes in document order.
    pub fn select_text_regions(&self, document: &DocumentTree) -> Vec<TextRegion> {
        document
            .html
            .tree
            .root()
            .descendants()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                if text.trim().is_empty() {
                    return None;
                }
                let parent_tag = parent_tag(node);
                if self.is_excluded(node, parent_tag) {
                    return None;
                }
                Some(TextRegion {
                    node: node.id(),
                    text: String::from(&**text),
                    parent_tag: parent_tag.map(str::to_string),
                })
            })
            .collect()
    }

    fn is_excluded(&self, node: NodeRef<'_, Node>, parent_tag: Option<&str>) -> bool {
        if parent_tag.is_some_and(|tag| self.excludes(tag) || is_raw_text(tag)) {
            return true;
        }
        match self.scope {
            ExclusionScope::Parent => false,
            ExclusionScope::Ancestors => node
                .ancestors()
                .filter_map(|ancestor| ancestor.value().as_element())
                .any(|element| self.excludes(element.name())),
        }
    }

    fn excludes(&self, tag: &str) -> bool {
        self.excluded
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(tag))
    }
}

fn parent_tag<'a>(node: NodeRef<'a, Node>) -> Option<&'a str> {
    node.parent()
        .and_then(|parent| parent.value().as_element())
        .map(|element| element.name())
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_TAGS
        .iter()
        .any(|raw| raw.eq_ignore_ascii_case(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(walker: &MarkupWalker, html: &str) -> Vec<String> {
        let doc = DocumentTree::parse(html);
        walker
            .select_text_regions(&doc)
            .into_iter()
            .map(|region| region.text)
            .collect()
    }

    #[test]
    fn fragment_round_trips_without_wrapper() {
        let doc = DocumentTree::parse("<p class=\"x\">Hello <b>world</b></p><p>again</p>");
        assert_eq!(
            doc.to_html(),
            "<p class=\"x\">Hello <b>world</b></p><p>again</p>"
        );
    }

    #[test]
    fn regions_in_document_order_skip_blank_text() {
        let walker = MarkupWalker::default();
        let got = texts(&walker, "<div>\n  <p>one</p>\n  <p>two <em>three</em></p></div>");
        assert_eq!(got, vec!["one", "two ", "three"]);
    }

    #[test]
    fn excluded_parents_are_skipped() {
        let walker = MarkupWalker::default();
        let got = texts(
            &walker,
            "<p>keep</p><a href=\"#\">link</a><script>var x = 1;</script>\
             <style>.a{}</style><textarea>typed</textarea>",
        );
        assert_eq!(got, vec!["keep"]);
    }

    #[test]
    fn parent_scope_only_checks_direct_parent() {
        let html = "<a href=\"#\"><em>nested</em></a>";
        assert_eq!(texts(&MarkupWalker::default(), html), vec!["nested"]);
        let strict = MarkupWalker::new(DEFAULT_EXCLUDED_TAGS, ExclusionScope::Ancestors);
        assert!(texts(&strict, html).is_empty());
    }

    #[test]
    fn exclusion_tags_are_case_insensitive() {
        let walker = MarkupWalker::new(["CODE"], ExclusionScope::Parent);
        assert_eq!(texts(&walker, "<p>a<code>b</code></p>"), vec!["a"]);
    }

    #[test]
    fn raw_text_containers_are_never_selected() {
        let walker = MarkupWalker::new(Vec::<String>::new(), ExclusionScope::Parent);
        assert!(texts(&walker, "<title>t</title><xmp>x</xmp>").is_empty());
    }

    #[test]
    fn top_level_text_has_fragment_root_parent() {
        let doc = DocumentTree::parse("bare text");
        let regions = MarkupWalker::default().select_text_regions(&doc);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].parent_tag.as_deref(), Some("html"));
    }

    #[test]
    fn splice_replaces_text_node_in_place() {
        let mut doc = DocumentTree::parse("<p>before</p><p>old</p><p>after</p>");
        let regions = MarkupWalker::default().select_text_regions(&doc);
        let target = regions[1].node;
        let fragment = DocumentTree::parse("new <b>bold</b> tail");
        let inserted = doc.splice_fragment(target, &fragment).unwrap();
        assert_eq!(inserted.len(), 3);
        assert_eq!(
            doc.to_html(),
            "<p>before</p><p>new <b>bold</b> tail</p><p>after</p>"
        );
        assert!(doc.text_of(regions[0].node).is_some());
    }

    #[test]
    fn splice_rejects_empty_fragment_and_stale_targets() {
        let mut doc = DocumentTree::parse("<p>text</p>");
        let target = MarkupWalker::default().select_text_regions(&doc)[0].node;
        assert!(doc.splice_fragment(target, &DocumentTree::parse("")).is_none());
        assert!(doc.splice_fragment(target, &DocumentTree::parse("x")).is_some());
        assert!(doc.splice_fragment(target, &DocumentTree::parse("y")).is_none());
        assert_eq!(doc.to_html(), "<p>x</p>");
    }

    #[test]
    fn counts_annotation_elements() {
        let doc = DocumentTree::parse(
            "<span class=\"glossary-tooltip\">a</span><span class=\"other\">b</span>\
             <p><span class=\"x glossary-tooltip\">c</span></p>",
        );
        assert_eq!(doc.annotation_count(), 2);
    }

    #[test]
    fn serializer_matches_html5ever_output() {
        let html = "<div title=\"a &amp; &quot;b&quot;\"><br><img src=\"x.png\">\
                    <script>if (a < b) {}</script><!-- note -->x &lt; y&nbsp;z</div>\
                    <svg><a xlink:href=\"#t\">t</a></svg>";
        let doc = DocumentTree::parse(html);
        assert_eq!(doc.to_html(), doc.html.root_element().inner_html());
    }

    #[test]
    fn overrides_replace_whole_subtrees() {
        let doc = DocumentTree::parse("<p>keep <span class=\"glossary-tooltip\">old</span> tail</p>");
        let span = doc
            .html
            .tree
            .nodes()
            .find(|node| node.value().as_element().is_some_and(|e| e.name() == "span"))
            .unwrap()
            .id();
        assert!(doc.is_annotation(span));
        let overrides = HashMap::from([(span, "<span data-x=\"&lt;\">new</span>".to_string())]);
        assert_eq!(
            doc.to_html_with(&overrides),
            "<p>keep <span data-x=\"&lt;\">new</span> tail</p>"
        );
    }
}
