use regex::Regex;
use std::sync::LazyLock;

use super::{Category, GlossaryStore, ScanKey};
use crate::casing::match_case;
use crate::normalize::{collapse_whitespace, has_internal_whitespace, normalize, strip_decoration};
use crate::tokenize::{Span, SpanKind, is_word_char, tokenize};

pub const DEFAULT_QUANTIFIERS: &[&str] = &["all", "all-but-one", "x"];

// Upper bound on spans joined into one multi-word key during token rewrite.
const MAX_PHRASE_SPANS: usize = 9;

static NUMERIC_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>\p{L}+)(?P<sep>[^\p{L}\p{N}])?(?P<digits>[0-9]+)(?P<trailing>\S*)$")
        .expect("numeric suffix pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLayer {
    ExactRaw,
    ExactStripped,
    ExactNormalized,
    WholeWord,
    WholeWordFolded,
    NumericSuffix,
    TokenRewrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Found { text: String, layer: MatchLayer },
    NotFound,
}

impl MatchOutcome {
    fn found(text: impl Into<String>, layer: MatchLayer) -> Self {
        MatchOutcome::Found {
            text: text.into(),
            layer,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MatchOutcome::Found { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            MatchOutcome::Found { text, .. } => Some(text),
            MatchOutcome::NotFound => None,
        }
    }

    pub fn layer(&self) -> Option<MatchLayer> {
        match self {
            MatchOutcome::Found { layer, .. } => Some(*layer),
            MatchOutcome::NotFound => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            MatchOutcome::Found { text, .. } => Some(text),
            MatchOutcome::NotFound => None,
        }
    }
}

/// Words that fuse with a preceding substituted token (`Бросить-All`).
/// Digit runs always count as quantifiers.
#[derive(Debug, Clone)]
pub struct QuantifierSet {
    // Lower-cased, longest first.
    words: Vec<String>,
}

impl QuantifierSet {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words: Vec<String> = words
            .into_iter()
            .map(|word| word.as_ref().trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        words.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        words.dedup();
        Self { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }
}

impl Default for QuantifierSet {
    fn default() -> Self {
        Self::new(DEFAULT_QUANTIFIERS)
    }
}

/// Layered glossary resolution over a [`GlossaryStore`].
///
/// Layers run in order and each only on the previous miss:
/// exact (raw, stripped, normalized), numeric-suffix splitting, then for
/// single-token input a whole-word scan (case-sensitive, then folded), and
/// for multi-word phrases a token-wise rewrite.
///
/// Exact layers are tried in the hinted category and then in
/// [`Category::Default`] before any fuzzy layer runs, so an exact default
/// entry beats a partial rewrite from the hinted category.
#[derive(Debug, Clone, Copy)]
pub struct GlossaryMatcher<'a> {
    store: &'a GlossaryStore,
    quantifiers: &'a QuantifierSet,
}

impl<'a> GlossaryMatcher<'a> {
    pub fn new(store: &'a GlossaryStore, quantifiers: &'a QuantifierSet) -> Self {
        Self { store, quantifiers }
    }

    pub fn match_text(&self, raw: &str, category: Category) -> MatchOutcome {
        let exact = self.match_exact_only(raw, category);
        if exact.is_found() {
            return exact;
        }
        self.with_default_fallback(category, |category| self.fuzzy_layers(raw, category))
    }

    /// Exact layers only; used for long free-form text where fuzzy lanes
    /// would produce false positives.
    pub fn match_exact_only(&self, raw: &str, category: Category) -> MatchOutcome {
        self.with_default_fallback(category, |category| self.exact_layers(raw, category))
    }

    fn with_default_fallback<F>(&self, category: Category, run: F) -> MatchOutcome
    where
        F: Fn(Category) -> MatchOutcome,
    {
        let outcome = run(category);
        if outcome.is_found() || category == Category::Default {
            return outcome;
        }
        run(Category::Default)
    }

    fn exact_layers(&self, raw: &str, category: Category) -> MatchOutcome {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return MatchOutcome::NotFound;
        }
        if let Some(value) = self.store.lookup_exact(trimmed, category) {
            return MatchOutcome::found(value, MatchLayer::ExactRaw);
        }

        let stripped = strip_decoration(raw);
        if stripped.is_empty() {
            return MatchOutcome::NotFound;
        }
        if let Some(value) = self.store.lookup_exact(&stripped, category) {
            return MatchOutcome::found(value, MatchLayer::ExactStripped);
        }
        if let Some(value) = self.store.lookup_normalized(&normalize(raw), category) {
            return MatchOutcome::found(value, MatchLayer::ExactNormalized);
        }
        MatchOutcome::NotFound
    }

    fn fuzzy_layers(&self, raw: &str, category: Category) -> MatchOutcome {
        let stripped = strip_decoration(raw);
        if stripped.is_empty() {
            return MatchOutcome::NotFound;
        }

        // Checked ahead of the whole-word lanes, which would otherwise claim
        // `Withdraw–5` and keep the en dash.
        let collapsed = collapse_whitespace(&stripped);
        if let Some(text) = self.split_numeric_suffix(&collapsed, category) {
            return MatchOutcome::found(text, MatchLayer::NumericSuffix);
        }

        let single_token = !has_internal_whitespace(&stripped);
        if single_token {
            let keys = self.store.scan_keys(category);
            if let Some(text) = replace_whole_word(&stripped, keys, false) {
                return MatchOutcome::found(text, MatchLayer::WholeWord);
            }
            if let Some(text) = replace_whole_word(&stripped, keys, true) {
                return MatchOutcome::found(text, MatchLayer::WholeWordFolded);
            }
        }

        if !single_token && let Some(text) = self.rewrite_tokens(&collapsed, category) {
            return MatchOutcome::found(text, MatchLayer::TokenRewrite);
        }

        MatchOutcome::NotFound
    }

    /// `Withdraw-10` / `Withdraw 10` → `<translation>-10`. Space and dash
    /// separators become a hyphen; any other separator is kept.
    fn split_numeric_suffix(&self, text: &str, category: Category) -> Option<String> {
        let caps = NUMERIC_SUFFIX.captures(text)?;
        let base = caps.name("base")?.as_str();
        let digits = caps.name("digits")?.as_str();
        let trailing = caps.name("trailing").map(|m| m.as_str()).unwrap_or("");
        let separator = match caps.name("sep").map(|m| m.as_str()) {
            Some(sep) if is_canonical_separator(sep) => "-",
            Some(sep) => sep,
            None => "",
        };
        let value = self.store.lookup(base, category)?;
        Some(format!(
            "{}{}{}{}",
            match_case(base, value),
            separator,
            digits,
            trailing
        ))
    }

    /// Substitutes every word run (or multi-word run) that has a glossary
    /// entry. Returns `None` when nothing changed.
    fn rewrite_tokens(&self, text: &str, category: Category) -> Option<String> {
        let spans = tokenize(text);
        let mut out = String::with_capacity(text.len());
        let mut idx = 0usize;
        while idx < spans.len() {
            let span = spans[idx];
            if span.kind != SpanKind::Word {
                out.push_str(span.text);
                idx += 1;
                continue;
            }
            let Some((end, value)) = self.longest_phrase_at(text, &spans, idx, category) else {
                out.push_str(span.text);
                idx += 1;
                continue;
            };
            let source_run = &text[span.start..spans[end].end()];
            out.push_str(&match_case(source_run, value));
            match self.quantifier_after(text, &spans, end + 1) {
                Some((quantifier_end, quantifier)) => {
                    out.push('-');
                    out.push_str(quantifier);
                    idx = quantifier_end + 1;
                }
                None => idx = end + 1,
            }
        }
        (out != text).then_some(out)
    }

    fn longest_phrase_at(
        &self,
        text: &str,
        spans: &[Span<'_>],
        start: usize,
        category: Category,
    ) -> Option<(usize, &'a str)> {
        let store: &'a GlossaryStore = self.store;
        let last = (start + MAX_PHRASE_SPANS).min(spans.len());
        (start..last).rev().find_map(|end| {
            if !matches!(spans[end].kind, SpanKind::Word | SpanKind::Digits) {
                return None;
            }
            let candidate = &text[spans[start].start..spans[end].end()];
            store.lookup(candidate, category).map(|value| (end, value))
        })
    }

    /// Looks for a quantifier right after a substituted run: a digit run or
    /// a configured word, optionally preceded by one space or dash. A word
    /// quantifier must be the whole token, ending at a space or the end.
    fn quantifier_after<'t>(
        &self,
        text: &'t str,
        spans: &[Span<'t>],
        next: usize,
    ) -> Option<(usize, &'t str)> {
        let gap = spans.get(next)?;
        let start = match gap.kind {
            SpanKind::Space => next + 1,
            SpanKind::Punct if is_canonical_separator(gap.text) => next + 1,
            SpanKind::Punct => return None,
            SpanKind::Word | SpanKind::Digits => next,
        };
        let first = spans.get(start)?;
        if first.kind == SpanKind::Digits {
            return Some((start, first.text));
        }
        if first.kind != SpanKind::Word {
            return None;
        }
        for word in self.quantifiers.words() {
            let mut joined = String::new();
            for (offset, span) in spans[start..].iter().enumerate() {
                if span.kind == SpanKind::Space {
                    break;
                }
                joined.push_str(&span.text.to_lowercase());
                if joined == *word {
                    let end = start + offset;
                    let at_boundary = spans
                        .get(end + 1)
                        .is_none_or(|after| after.kind == SpanKind::Space);
                    if !at_boundary {
                        break;
                    }
                    return Some((end, &text[first.start..spans[end].end()]));
                }
                if joined.len() >= word.len() {
                    break;
                }
            }
        }
        None
    }
}

fn is_canonical_separator(sep: &str) -> bool {
    let mut chars = sep.chars();
    let (Some(ch), None) = (chars.next(), chars.next()) else {
        return false;
    };
    ch.is_whitespace() || matches!(ch, '-' | '\u{2010}'..='\u{2015}' | '\u{2212}')
}

/// Replaces the first whole-word occurrence of the longest matching key.
/// `keys` must be ordered longest first.
fn replace_whole_word(haystack: &str, keys: &[ScanKey], folded: bool) -> Option<String> {
    keys.iter().find_map(|key| {
        let needle = if folded {
            key.normalized.as_str()
        } else {
            key.stripped.as_str()
        };
        let (start, end) = find_whole_word(haystack, needle, folded)?;
        Some(format!(
            "{}{}{}",
            &haystack[..start],
            match_case(&haystack[start..end], &key.value),
            &haystack[end..]
        ))
    })
}

/// Byte range of the first occurrence of `needle` in `haystack` that does not
/// sit inside a larger word.
pub(crate) fn find_whole_word(haystack: &str, needle: &str, folded: bool) -> Option<(usize, usize)> {
    let needle_first = needle.chars().next()?;
    let needle_last = needle.chars().next_back()?;
    for (start, _) in haystack.char_indices() {
        let Some(end) = match_at(haystack, start, needle, folded) else {
            continue;
        };
        let before_ok = !is_word_char(needle_first)
            || !haystack[..start].chars().next_back().is_some_and(is_word_char);
        let after_ok = !is_word_char(needle_last)
            || !haystack[end..].chars().next().is_some_and(is_word_char);
        if before_ok && after_ok {
            return Some((start, end));
        }
    }
    None
}

fn match_at(haystack: &str, start: usize, needle: &str, folded: bool) -> Option<usize> {
    let mut hay = haystack[start..].char_indices();
    for expected in needle.chars() {
        let (_, actual) = hay.next()?;
        let same = if folded {
            actual.to_lowercase().eq(expected.to_lowercase())
        } else {
            actual == expected
        };
        if !same {
            return None;
        }
    }
    Some(hay.next().map(|(offset, _)| start + offset).unwrap_or(haystack.len()))
}
