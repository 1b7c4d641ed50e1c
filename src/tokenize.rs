#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Word,
    Digits,
    Space,
    Punct,
}

/// A maximal run of one character class, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub kind: SpanKind,
    pub text: &'a str,
    pub start: usize,
}

impl Span<'_> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

pub fn classify(ch: char) -> SpanKind {
    if ch.is_alphabetic() {
        SpanKind::Word
    } else if ch.is_ascii_digit() {
        SpanKind::Digits
    } else if ch.is_whitespace() {
        SpanKind::Space
    } else {
        SpanKind::Punct
    }
}

/// Splits the input into word / digit / whitespace / punctuation runs.
/// Concatenating every span's text reproduces the input exactly.
pub fn tokenize(input: &str) -> Vec<Span<'_>> {
    let mut spans = Vec::new();
    let mut current: Option<(SpanKind, usize)> = None;
    for (idx, ch) in input.char_indices() {
        let kind = classify(ch);
        match current {
            Some((active, _)) if active == kind => {}
            Some((active, start)) => {
                spans.push(Span {
                    kind: active,
                    text: &input[start..idx],
                    start,
                });
                current = Some((kind, idx));
            }
            None => current = Some((kind, idx)),
        }
    }
    if let Some((kind, start)) = current {
        spans.push(Span {
            kind,
            text: &input[start..],
            start,
        });
    }
    spans
}

/// Whether `ch` counts as part of a word for boundary checks.
pub(crate) fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric()
}
