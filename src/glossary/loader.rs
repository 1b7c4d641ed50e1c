use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{Category, GlossaryRecord, GlossaryStore};

pub const GLOSSARY_EXTENSION: &str = "tsv";

static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("multi-space pattern"));

const HEADER_WORDS: &[&str] = &[
    "source",
    "target",
    "key",
    "value",
    "english",
    "original",
    "translation",
    "en",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub records: usize,
    pub skipped_lines: usize,
}

/// Parses two-column glossary text. Columns are separated by a tab or,
/// failing that, by two or more spaces. A header row in first position is
/// detected and skipped.
pub fn parse_records(content: &str, category: Category, lang: &str) -> (Vec<GlossaryRecord>, usize) {
    let mut records = Vec::new();
    let mut skipped = 0usize;
    let mut seen_first = false;

    for (line_num, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim_start_matches('\u{feff}').trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((source, target)) = split_columns(line) else {
            warn!(
                "invalid glossary entry ({}) at line {}: {}",
                category,
                line_num + 1,
                line
            );
            skipped += 1;
            continue;
        };
        let first = !seen_first;
        seen_first = true;
        if first && is_header(source, target, lang) {
            debug!("skipping glossary header ({}): {}", category, line);
            continue;
        }
        records.push(GlossaryRecord::new(source, category, target));
    }

    (records, skipped)
}

/// Loads `<dir>/<category>.tsv` for every category into `store`, replacing
/// whatever was there. Missing files leave their category empty. On error
/// `store` is left untouched.
pub fn load_language_dir(store: &mut GlossaryStore, dir: &Path, lang: &str) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let mut fresh = GlossaryStore::new();
    for category in Category::ALL {
        let path = dir.join(format!("{}.{}", category.as_str(), GLOSSARY_EXTENSION));
        if !path.exists() {
            fresh.load(Vec::new(), category);
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read glossary: {}", path.display()))?;
        let (records, skipped) = parse_records(&content, category, lang);
        report.files += 1;
        report.records += records.len();
        report.skipped_lines += skipped;
        fresh.load(records, category);
    }
    *store = fresh;
    Ok(report)
}

fn split_columns(line: &str) -> Option<(&str, &str)> {
    let (source, target) = match line.split_once('\t') {
        Some(pair) => pair,
        None => {
            let found = MULTI_SPACE.find(line)?;
            (&line[..found.start()], &line[found.end()..])
        }
    };
    // A third column (notes) is tolerated and dropped.
    let target = target.split('\t').next().unwrap_or(target);
    let source = source.trim();
    let target = target.trim();
    if source.is_empty() || target.is_empty() {
        return None;
    }
    Some((source, target))
}

fn is_header(source: &str, target: &str, lang: &str) -> bool {
    let lang = lang.trim().to_lowercase();
    let is_word = |value: &str| {
        let value = value.trim().to_lowercase();
        HEADER_WORDS.contains(&value.as_str()) || (!lang.is_empty() && value == lang)
    };
    is_word(source) && is_word(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_tab_and_space_delimited_rows() {
        let content = "Take\tВзять\nTalk-to    Поговорить\n";
        let (records, skipped) = parse_records(content, Category::Action, "ru");
        assert_eq!(skipped, 0);
        assert_eq!(
            records,
            vec![
                GlossaryRecord::new("Take", Category::Action, "Взять"),
                GlossaryRecord::new("Talk-to", Category::Action, "Поговорить"),
            ]
        );
    }

    #[test]
    fn multi_word_keys_survive_space_delimiting() {
        let (records, _) = parse_records("Bank booth   Банковская стойка", Category::Object, "ru");
        assert_eq!(records[0].key, "Bank booth");
        assert_eq!(records[0].value, "Банковская стойка");
    }

    #[test]
    fn skips_header_comments_and_malformed_lines() {
        let content = "source\tru\n# items\nCoins\tМонеты\nbroken-line\n\nLogs\tБрёвна\tnote\n";
        let (records, skipped) = parse_records(content, Category::Item, "ru");
        assert_eq!(skipped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value, "Брёвна");
    }

    #[test]
    fn header_detection_only_applies_to_first_row() {
        let content = "Coins\tМонеты\nkey\tvalue\n";
        let (records, _) = parse_records(content, Category::Item, "ru");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn loads_every_category_from_directory() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("action.tsv"), "English\tru\nDrop\tБросить\n")
            .expect("write action");
        fs::write(dir.path().join("item.tsv"), "Coins\tМонеты\n").expect("write item");

        let mut store = GlossaryStore::new();
        store.load(
            vec![GlossaryRecord::new("Stale", Category::Npc, "Старый")],
            Category::Npc,
        );
        let report = load_language_dir(&mut store, dir.path(), "ru").expect("load dir");

        assert_eq!(report.files, 2);
        assert_eq!(store.lookup("Coins", Category::Item), Some("Монеты"));
        assert_eq!(store.lookup("Drop", Category::Action), Some("Бросить"));
        assert_eq!(store.lookup("Stale", Category::Npc), None);
        assert_eq!(report.records, 2);
    }
}
