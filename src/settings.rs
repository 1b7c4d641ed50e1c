use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_CAPACITY;
use crate::dispatcher::{DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_INTERVAL};
use crate::glossary::matcher::DEFAULT_QUANTIFIERS;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub target_lang: String,
    pub source_lang: String,
    pub long_text_words: usize,
    pub cache_capacity: usize,
    pub cache_dir: Option<String>,
    pub glossary_dir: Option<String>,
    pub quantifiers: Vec<String>,
    pub bucket_capacity: u32,
    pub refill_interval: Duration,
    pub timeout: Duration,
    pub model: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_lang: "ru".to_string(),
            source_lang: "en".to_string(),
            long_text_words: 5,
            cache_capacity: DEFAULT_CAPACITY,
            cache_dir: None,
            glossary_dir: None,
            quantifiers: DEFAULT_QUANTIFIERS.iter().map(|q| q.to_string()).collect(),
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            timeout: Duration::from_secs(10),
            model: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    system: Option<SystemSettings>,
    cache: Option<CacheSettings>,
    glossary: Option<GlossarySettings>,
    remote: Option<RemoteSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemSettings {
    target_lang: Option<String>,
    source_lang: Option<String>,
    long_text_words: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSettings {
    capacity: Option<usize>,
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GlossarySettings {
    dir: Option<String>,
    quantifiers: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteSettings {
    bucket_capacity: Option<u32>,
    refill_interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
    model: Option<String>,
}

/// Layers the embedded defaults, the working directory files, the base
/// directory files and finally `extra_path`, later files winning per field.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let embedded: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse embedded settings")?;
    settings.merge(embedded);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(base) = paths::base_dir() {
        ordered_paths.push(base.join("settings.toml"));
        ordered_paths.push(base.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }
    Ok(settings)
}

impl Settings {
    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(system) = incoming.system {
            if let Some(lang) = non_blank(system.target_lang) {
                self.target_lang = lang.to_lowercase();
            }
            if let Some(lang) = non_blank(system.source_lang) {
                self.source_lang = lang.to_lowercase();
            }
            if let Some(words) = system.long_text_words
                && words > 0
            {
                self.long_text_words = words;
            }
        }
        if let Some(cache) = incoming.cache {
            if let Some(capacity) = cache.capacity
                && capacity > 0
            {
                self.cache_capacity = capacity;
            }
            if let Some(dir) = non_blank(cache.dir) {
                self.cache_dir = Some(dir);
            }
        }
        if let Some(glossary) = incoming.glossary {
            if let Some(dir) = non_blank(glossary.dir) {
                self.glossary_dir = Some(dir);
            }
            if let Some(quantifiers) = glossary.quantifiers {
                self.quantifiers = quantifiers
                    .into_iter()
                    .filter(|q| !q.trim().is_empty())
                    .collect();
            }
        }
        if let Some(remote) = incoming.remote {
            if let Some(capacity) = remote.bucket_capacity
                && capacity > 0
            {
                self.bucket_capacity = capacity;
            }
            if let Some(ms) = remote.refill_interval_ms
                && ms > 0
            {
                self.refill_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = remote.timeout_ms
                && ms > 0
            {
                self.timeout = Duration::from_millis(ms);
            }
            if let Some(model) = non_blank(remote.model) {
                self.model = Some(model);
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
