use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};

use crate::normalize::{normalize, strip_decoration};

pub mod loader;
pub mod matcher;

pub use loader::{LoadReport, load_language_dir, parse_records};
pub use matcher::{GlossaryMatcher, MatchLayer, MatchOutcome, QuantifierSet};

/// UI role of a source string. The same spelling may translate
/// differently depending on where it appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Action,
    Npc,
    Item,
    Object,
    Dialogue,
    Interface,
    Default,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Action,
        Category::Npc,
        Category::Item,
        Category::Object,
        Category::Dialogue,
        Category::Interface,
        Category::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Action => "action",
            Category::Npc => "npc",
            Category::Item => "item",
            Category::Object => "object",
            Category::Dialogue => "dialogue",
            Category::Interface => "interface",
            Category::Default => "default",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "action" | "actions" => Ok(Category::Action),
            "npc" | "npcs" => Ok(Category::Npc),
            "item" | "items" => Ok(Category::Item),
            "object" | "objects" => Ok(Category::Object),
            "dialogue" | "dialog" => Ok(Category::Dialogue),
            "interface" | "ui" => Ok(Category::Interface),
            "default" | "" => Ok(Category::Default),
            other => Err(anyhow!("unknown glossary category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryRecord {
    pub key: String,
    pub category: Category,
    pub value: String,
}

impl GlossaryRecord {
    pub fn new(key: impl Into<String>, category: Category, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            category,
            value: value.into(),
        }
    }
}

/// Key prepared for whole-word scanning.
#[derive(Debug, Clone)]
pub(crate) struct ScanKey {
    pub(crate) stripped: String,
    pub(crate) normalized: String,
    pub(crate) value: String,
}

#[derive(Debug, Clone, Default)]
struct CategoryIndex {
    exact: HashMap<String, String>,
    normalized: HashMap<String, String>,
    // Longest key first, so the first whole-word hit is the longest one.
    scan: Vec<ScanKey>,
}

impl CategoryIndex {
    fn build(records: Vec<GlossaryRecord>) -> Self {
        let mut index = CategoryIndex::default();
        for record in records {
            let exact_key = record.key.trim().to_string();
            if exact_key.is_empty() {
                continue;
            }
            let normalized_key = normalize(&exact_key);
            index
                .normalized
                .entry(normalized_key)
                .or_insert_with(|| record.value.clone());
            index.exact.insert(exact_key, record.value);
        }

        let mut scan: Vec<ScanKey> = index
            .exact
            .iter()
            .filter_map(|(key, value)| {
                let stripped = strip_decoration(key);
                if stripped.is_empty() {
                    return None;
                }
                Some(ScanKey {
                    normalized: normalize(&stripped),
                    stripped,
                    value: value.clone(),
                })
            })
            .collect();
        scan.sort_by(|a, b| {
            b.stripped
                .chars()
                .count()
                .cmp(&a.stripped.chars().count())
                .then_with(|| a.stripped.cmp(&b.stripped))
        });
        index.scan = scan;
        index
    }
}

/// Per-category dual index over bulk-loaded glossary records.
#[derive(Debug, Clone, Default)]
pub struct GlossaryStore {
    categories: HashMap<Category, CategoryIndex>,
}

impl GlossaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every entry of `category` with `records`. Records whose own
    /// category differs are ignored.
    pub fn load(&mut self, records: Vec<GlossaryRecord>, category: Category) {
        let records = records
            .into_iter()
            .filter(|record| record.category == category)
            .collect();
        self.categories
            .insert(category, CategoryIndex::build(records));
    }

    /// Original-case lookup on the authored key.
    pub fn lookup_exact(&self, key: &str, category: Category) -> Option<&str> {
        self.categories
            .get(&category)?
            .exact
            .get(key)
            .map(String::as_str)
    }

    /// Lookup on an already-normalized key.
    pub fn lookup_normalized(&self, normalized_key: &str, category: Category) -> Option<&str> {
        self.categories
            .get(&category)?
            .normalized
            .get(normalized_key)
            .map(String::as_str)
    }

    /// Original case first, then the normalized index.
    pub fn lookup(&self, key: &str, category: Category) -> Option<&str> {
        self.lookup_exact(key, category)
            .or_else(|| self.lookup_normalized(&normalize(key), category))
    }

    pub(crate) fn scan_keys(&self, category: Category) -> &[ScanKey] {
        self.categories
            .get(&category)
            .map(|index| index.scan.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self, category: Category) -> usize {
        self.categories
            .get(&category)
            .map(|index| index.exact.len())
            .unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.categories.values().map(|index| index.exact.len()).sum()
    }
}
