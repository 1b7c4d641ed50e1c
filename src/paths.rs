use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "GLOSSARY_TRANSLATOR_DIR";
const DEFAULT_DIR_NAME: &str = ".glossary-translator-rust";

/// Root for settings, glossaries and the cache: the env override if set,
/// otherwise `$HOME/.glossary-translator-rust`.
pub(crate) fn base_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(DEFAULT_DIR_NAME)
}

pub(crate) fn glossary_dir() -> PathBuf {
    base_dir()
        .map(|dir| dir.join("glossaries"))
        .unwrap_or_else(|| Path::new(DEFAULT_DIR_NAME).join("glossaries"))
}

pub(crate) fn cache_dir() -> PathBuf {
    base_dir()
        .map(|dir| dir.join(".cache"))
        .unwrap_or_else(|| Path::new(DEFAULT_DIR_NAME).join(".cache"))
}

/// One snapshot file per target language.
pub fn cache_file(dir: &Path, lang: &str) -> PathBuf {
    dir.join(format!("translations.{}.json", lang))
}

pub(crate) fn resolve_dir(value: Option<&str>, fallback: impl FnOnce() -> PathBuf) -> PathBuf {
    value.and_then(normalize_dir).unwrap_or_else(fallback)
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_tilde(trimmed);
    let mut normalized = PathBuf::new();
    for component in Path::new(&expanded).components() {
        normalized.push(component.as_os_str());
    }
    Some(normalized)
}

fn expand_tilde(value: &str) -> String {
    if (value == "~" || value.starts_with("~/"))
        && let Ok(home) = std::env::var("HOME")
    {
        let home = home.trim();
        if home.is_empty() {
            return value.to_string();
        }
        return format!("{}{}", home, &value[1..]);
    }
    value.to_string()
}
