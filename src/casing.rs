/// Adjusts `replacement` to follow the capitalization style of `source`.
///
/// An all-caps source upper-cases the replacement, a capitalized source
/// (first letter upper, remaining letters lower) capitalizes the
/// replacement's first character and lower-cases the rest, and any other
/// source leaves the replacement untouched.
pub fn match_case(source: &str, replacement: &str) -> String {
    match CaseStyle::of(source) {
        CaseStyle::Upper => replacement.to_uppercase(),
        CaseStyle::Capitalized => capitalize(replacement),
        CaseStyle::Other => replacement.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseStyle {
    Upper,
    Capitalized,
    Other,
}

impl CaseStyle {
    fn of(source: &str) -> Self {
        let mut letters = source.chars().filter(|ch| ch.is_alphabetic());
        let Some(first) = letters.next() else {
            return CaseStyle::Other;
        };
        let rest: Vec<char> = letters.collect();
        let has_lower = first.is_lowercase() || rest.iter().any(|ch| ch.is_lowercase());
        let has_upper = first.is_uppercase() || rest.iter().any(|ch| ch.is_uppercase());
        if has_upper && !has_lower {
            return CaseStyle::Upper;
        }
        if first.is_uppercase() && !rest.iter().any(|ch| ch.is_uppercase()) {
            return CaseStyle::Capitalized;
        }
        CaseStyle::Other
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut out: String = first.to_uppercase().collect();
    out.push_str(&chars.as_str().to_lowercase());
    out
}

#[cfg(test)]
mod tests {
    use super::match_case;

    #[test]
    fn upper_source_uppercases_replacement() {
        assert_eq!(match_case("TAKE", "взять"), "ВЗЯТЬ");
    }

    #[test]
    fn capitalized_source_capitalizes_replacement() {
        assert_eq!(match_case("Take", "взять"), "Взять");
        assert_eq!(match_case("Talk-to", "поГОВОРИТЬ"), "Поговорить");
    }

    #[test]
    fn lower_source_keeps_replacement() {
        assert_eq!(match_case("take", "взять"), "взять");
        assert_eq!(match_case("take", "Взять"), "Взять");
    }

    #[test]
    fn mixed_or_letterless_source_keeps_replacement() {
        assert_eq!(match_case("McGrubor", "МакГрубор"), "МакГрубор");
        assert_eq!(match_case("10", "десять"), "десять");
    }
}
