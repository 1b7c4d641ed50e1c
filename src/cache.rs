use anyhow::{Context, Result};
use lru::LruCache;
use serde_json::{Map, Value};
use std::fs;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 2000;

/// Bounded LRU map of source text to translation, shared between the
/// driver tick and async completions, and persisted as one flat JSON object.
///
/// Entries are never overwritten once present, so a source string keeps the
/// same translation for the whole session.
#[derive(Debug)]
pub struct TranslationCache {
    entries: Mutex<LruCache<String, String>>,
    dirty: AtomicBool,
    path: Option<PathBuf>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            dirty: AtomicBool::new(false),
            path: None,
        }
    }

    /// A cache backed by `path`. Nothing is read until [`load_snapshot`].
    ///
    /// [`load_snapshot`]: TranslationCache::load_snapshot
    pub fn with_path(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut cache = Self::new(capacity);
        cache.path = Some(path.into());
        cache
    }

    /// Returns the cached translation and marks it most recently used.
    pub fn get(&self, source: &str) -> Option<String> {
        self.lock().get(source).cloned()
    }

    /// Reads without touching recency.
    pub fn peek(&self, source: &str) -> Option<String> {
        self.lock().peek(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.lock().contains(source)
    }

    /// Inserts a new mapping, evicting the least recently used entry when
    /// full. An existing mapping is kept and only promoted; returns whether
    /// the value was stored.
    pub fn put(&self, source: impl Into<String>, translation: impl Into<String>) -> bool {
        let source = source.into();
        let mut entries = self.lock();
        if entries.get(&source).is_some() {
            return false;
        }
        if let Some((evicted, _)) = entries.push(source, translation.into()) {
            debug!("translation cache evicted: {}", evicted);
        }
        self.dirty.store(true, Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Writes the whole map to a temporary file beside the destination and
    /// renames it into place. Returns `Ok(false)` when nothing changed since
    /// the last write or the cache has no backing file.
    pub fn persist_snapshot(&self) -> Result<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        let result = write_atomic(path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, &snapshot)
                .with_context(|| "failed to serialize translation cache")?;
            writer.write_all(b"\n")?;
            Ok(())
        });
        if let Err(err) = result {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        debug!(
            "translation cache saved: {} ({} entries)",
            path.display(),
            snapshot.len()
        );
        Ok(true)
    }

    /// Best-effort load of the backing file. A missing, empty or malformed
    /// file is a cold start. Returns the number of entries loaded.
    pub fn load_snapshot(&self) -> usize {
        let Some(path) = self.path.as_deref() else {
            return 0;
        };
        match read_snapshot(path) {
            Ok(Some(map)) => {
                let mut entries = self.lock();
                entries.clear();
                // The file is written least recent first, so replaying it in
                // order restores recency.
                for (source, value) in map {
                    if let Value::String(translation) = value {
                        entries.push(source, translation);
                    }
                }
                let loaded = entries.len();
                drop(entries);
                self.dirty.store(false, Ordering::Release);
                debug!(
                    "translation cache loaded: {} ({} entries)",
                    path.display(),
                    loaded
                );
                loaded
            }
            Ok(None) => 0,
            Err(err) => {
                warn!("ignoring translation cache {}: {:#}", path.display(), err);
                0
            }
        }
    }

    fn snapshot(&self) -> Map<String, Value> {
        let entries = self.lock();
        let mut map = Map::new();
        for (source, translation) in entries.iter().rev() {
            map.insert(source.clone(), Value::String(translation.clone()));
        }
        map
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, String>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read translation cache: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let map: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse translation cache: {}", path.display()))?;
    Ok(Some(map))
}

/// Writes through `fill` into a temporary file in the destination directory
/// and atomically replaces `path` with it. If `fill` fails the temporary file
/// is removed and `path` is left as it was.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    {
        let mut writer = BufWriter::new(&mut temp);
        fill(&mut writer)?;
        writer
            .flush()
            .with_context(|| "failed to flush translation cache")?;
    }
    temp.as_file()
        .sync_all()
        .with_context(|| "failed to sync translation cache")?;
    temp.persist(path)
        .with_context(|| format!("failed to replace translation cache: {}", path.display()))?;
    Ok(())
}
