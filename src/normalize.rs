use regex::Regex;
use std::sync::LazyLock;

static DECORATION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("decoration tag pattern"));

/// Canonical lookup key: decoration removed, non-breaking spaces folded,
/// whitespace collapsed, trimmed and lower-cased.
pub fn normalize(raw: &str) -> String {
    let stripped = strip_decoration(raw);
    collapse_whitespace(&stripped).trim().to_lowercase()
}

/// Removes `<tag=...>` / `</tag>` markup and turns non-breaking spaces into
/// plain spaces. Casing and inner spacing are preserved.
pub fn strip_decoration(raw: &str) -> String {
    let mut current = replace_nbsp(raw);
    // Removing one tag can expose another (`<<b>x>`), so run to a fixed point.
    loop {
        let next = DECORATION_TAG.replace_all(&current, "");
        if next.len() == current.len() {
            break;
        }
        current = next.into_owned();
    }
    current.trim().to_string()
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

/// True when the text, once stripped, still contains whitespace between
/// its first and last visible characters.
pub fn has_internal_whitespace(value: &str) -> bool {
    value.trim().chars().any(char::is_whitespace)
}

pub(crate) fn word_count(value: &str) -> usize {
    value.split_whitespace().count()
}

fn replace_nbsp(value: &str) -> String {
    value
        .chars()
        .map(|ch| if is_nbsp(ch) { ' ' } else { ch })
        .collect()
}

fn is_nbsp(ch: char) -> bool {
    matches!(ch, '\u{00A0}' | '\u{2007}' | '\u{202F}')
}
