use crate::{GlossaryError, TermDictionary};
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Compiled-size ceiling for the term alternation. Large glossaries produce
/// large automata, so this sits well above the regex crate default.
pub const DEFAULT_SIZE_LIMIT: usize = 64 * (1 << 20);

const TERM_GROUP: &str = "term";
const LETTER: &str = r"\A\p{L}\z";

/// Compiles a dictionary into a single boundary-aware alternation.
#[derive(Debug, Clone)]
pub struct MatcherBuilder {
    size_limit: usize,
}

impl Default for MatcherBuilder {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

impl MatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size_limit(mut self, bytes: usize) -> Self {
        self.size_limit = bytes;
        self
    }

    pub fn build(&self, dictionary: &TermDictionary) -> Result<CompiledMatcher, GlossaryError> {
        let mut keys: Vec<&str> = dictionary.keys().collect();
        if keys.is_empty() {
            return Ok(CompiledMatcher {
                regex: None,
                letter: None,
                term_count: 0,
            });
        }
        // Longest first so a key never shadows a longer key sharing its start.
        keys.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        let pattern = boundary_pattern(&keys);
        let regex = RegexBuilder::new(&pattern)
            .size_limit(self.size_limit)
            .dfa_size_limit(self.size_limit)
            .build()?;
        let letter = Regex::new(LETTER)?;
        debug!(terms = keys.len(), pattern_len = pattern.len(), "compiled term matcher");
        Ok(CompiledMatcher {
            regex: Some(regex),
            letter: Some(letter),
            term_count: keys.len(),
        })
    }
}

/// The regex crate has no lookaround. The trailing boundary is consumed, so
/// a longer key that runs into a letter falls back to a shorter one, and the
/// search resumes at the end of the term group. The leading boundary is the
/// same for every key starting at one offset, so it is checked against the
/// preceding character after the fact.
fn boundary_pattern(keys: &[&str]) -> String {
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");
    format!(r"(?i:(?P<{TERM_GROUP}>{alternation}))(?:\P{{L}}|\z)")
}

/// Read-only matcher; safe to share across threads.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    regex: Option<Regex>,
    letter: Option<Regex>,
    term_count: usize,
}

impl CompiledMatcher {
    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    /// Lazily yields non-overlapping term matches from left to right.
    pub fn find_iter<'m, 't>(&'m self, text: &'t str) -> TermMatches<'m, 't> {
        TermMatches {
            matcher: self,
            text,
            pos: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermMatch<'t> {
    pub start: usize,
    pub end: usize,
    pub text: &'t str,
}

pub struct TermMatches<'m, 't> {
    matcher: &'m CompiledMatcher,
    text: &'t str,
    pos: usize,
}

impl<'m, 't> TermMatches<'m, 't> {
    fn follows_letter(&self, letter: &Regex, offset: usize) -> bool {
        let mut buf = [0u8; 4];
        self.text[..offset]
            .chars()
            .next_back()
            .is_some_and(|c| letter.is_match(c.encode_utf8(&mut buf)))
    }
}

impl<'m, 't> Iterator for TermMatches<'m, 't> {
    type Item = TermMatch<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let regex = self.matcher.regex.as_ref()?;
        let letter = self.matcher.letter.as_ref()?;
        while self.pos < self.text.len() {
            let caps = regex.captures_at(self.text, self.pos)?;
            let term = caps.name(TERM_GROUP)?;
            let Some(first) = term.as_str().chars().next() else {
                // Keys are never empty; stop rather than loop on a zero-width hit.
                self.pos = self.text.len();
                return None;
            };
            if self.follows_letter(letter, term.start()) {
                self.pos = term.start() + first.len_utf8();
                continue;
            }
            self.pos = term.end();
            return Some(TermMatch {
                start: term.start(),
                end: term.end(),
                text: term.as_str(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TermEntry;

    fn matcher(keys: &[&str]) -> CompiledMatcher {
        let entries = keys
            .iter()
            .enumerate()
            .map(|(i, key)| TermEntry::new(key, *key, "", i as u32 + 1));
        let dict = TermDictionary::from_entries(entries).unwrap();
        MatcherBuilder::new().build(&dict).unwrap()
    }

    fn found<'t>(m: &CompiledMatcher, text: &'t str) -> Vec<&'t str> {
        m.find_iter(text).map(|hit| hit.text).collect()
    }

    #[test]
    fn longest_term_wins() {
        let m = matcher(&["cell", "stem cell"]);
        assert_eq!(found(&m, "stem cell disorder"), vec!["stem cell"]);
        assert_eq!(found(&m, "a cell and a stem cell"), vec!["cell", "stem cell"]);
    }

    #[test]
    fn rejects_letter_adjacent_matches() {
        let m = matcher(&["cell"]);
        assert!(found(&m, "cellular biology").is_empty());
        assert!(found(&m, "cells-unit").is_empty());
        assert!(found(&m, "subcell").is_empty());
    }

    #[test]
    fn accepts_punctuation_and_digit_boundaries() {
        let m = matcher(&["cell"]);
        assert_eq!(found(&m, "the cell."), vec!["cell"]);
        assert_eq!(found(&m, "cell-phone"), vec!["cell"]);
        assert_eq!(found(&m, "3cell cell2"), vec!["cell", "cell"]);
        assert_eq!(found(&m, "(cell)"), vec!["cell"]);
    }

    #[test]
    fn boundary_uses_unicode_letters() {
        let m = matcher(&["cell"]);
        assert!(found(&m, "écell").is_empty());
        assert!(found(&m, "cellé").is_empty());
        assert!(found(&m, "日本cell").is_empty());
    }

    #[test]
    fn case_insensitive_unicode() {
        let m = matcher(&["café"]);
        assert_eq!(found(&m, "CAFÉ Café café"), vec!["CAFÉ", "Café", "café"]);
    }

    #[test]
    fn adjacent_matches_share_a_boundary() {
        let m = matcher(&["api"]);
        let hits: Vec<_> = m.find_iter("api api,api").map(|h| (h.start, h.end)).collect();
        assert_eq!(hits, vec![(0, 3), (4, 7), (8, 11)]);
    }

    #[test]
    fn symbol_edged_terms_can_touch() {
        let m = matcher(&["c#", ".net"]);
        let hits: Vec<_> = m.find_iter("c#.net").map(|h| (h.start, h.end)).collect();
        assert_eq!(hits, vec![(0, 2), (2, 6)]);

        let m = matcher(&["#"]);
        assert_eq!(found(&m, "##"), vec!["#", "#"]);
    }

    #[test]
    fn search_continues_past_a_letter_preceded_hit() {
        let m = matcher(&["cell"]);
        let hits: Vec<_> = m.find_iter("subcell cell").map(|h| (h.start, h.end)).collect();
        assert_eq!(hits, vec![(8, 12)]);
    }

    #[test]
    fn falls_back_to_shorter_term_when_longer_breaks_boundary() {
        let m = matcher(&["stem", "stem cell"]);
        assert_eq!(found(&m, "stem cells"), vec!["stem"]);
    }

    #[test]
    fn escapes_regex_metacharacters() {
        let m = matcher(&["c++", "node.js"]);
        assert_eq!(found(&m, "C++ and Node.js, not nodexjs"), vec!["C++", "Node.js"]);
    }

    #[test]
    fn empty_dictionary_never_matches() {
        let dict = TermDictionary::empty().unwrap();
        let m = MatcherBuilder::new().build(&dict).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.find_iter("anything").count(), 0);
    }

    #[test]
    fn tiny_size_limit_surfaces_pattern_error() {
        let dict = TermDictionary::from_entries(
            (0..200).map(|i| TermEntry::new(format!("term number {i}"), "T", "", i)),
        )
        .unwrap();
        let result = MatcherBuilder::new().size_limit(64).build(&dict);
        assert!(matches!(result, Err(GlossaryError::Pattern(_))));
    }
}
