use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::{DEFAULT_CAPACITY, TranslationCache};
use crate::casing::match_case;
use crate::dispatcher::{
    Dispatch, DispatchRequest, Dispatcher, DispatcherConfig, FailureKind, Identity,
    OutcomeReceiver, TranslationOutcome,
};
use crate::glossary::{
    Category, GlossaryMatcher, GlossaryStore, LoadReport, MatchLayer, QuantifierSet,
    load_language_dir,
};
use crate::normalize::word_count;
use crate::paths;
use crate::providers::{Provider, ProviderImpl};
use crate::settings::Settings;

/// One candidate string from the scan, with where it came from on screen.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub source: String,
    pub identity: Identity,
    pub category: Category,
    /// Short language code; blank means the configured default.
    pub target_lang: String,
}

impl TranslationRequest {
    pub fn new(source: impl Into<String>, identity: Identity, category: Category) -> Self {
        Self {
            source: source.into(),
            identity,
            category,
            target_lang: String::new(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.target_lang = lang.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Empty,
    Cache,
    Glossary(MatchLayer),
    /// No remote credential; the source is shown as is.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    InFlight,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready { text: String, origin: Origin },
    /// A remote call was started; the result arrives through [`Resolver::drain`].
    Pending,
    /// Nothing to show this tick; ask again on a later one.
    Deferred(DeferReason),
}

impl Resolution {
    pub fn text(&self) -> Option<&str> {
        match self {
            Resolution::Ready { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub default_lang: String,
    pub long_text_words: usize,
    pub cache_capacity: usize,
    /// `None` keeps caches in memory only.
    pub cache_dir: Option<PathBuf>,
    pub glossary_dir: PathBuf,
    pub quantifiers: QuantifierSet,
    pub dispatcher: DispatcherConfig,
}

impl ResolverConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_lang: settings.target_lang.clone(),
            long_text_words: settings.long_text_words,
            cache_capacity: settings.cache_capacity,
            cache_dir: Some(paths::resolve_dir(
                settings.cache_dir.as_deref(),
                paths::cache_dir,
            )),
            glossary_dir: paths::resolve_dir(settings.glossary_dir.as_deref(), paths::glossary_dir),
            quantifiers: QuantifierSet::new(&settings.quantifiers),
            dispatcher: DispatcherConfig {
                source_lang: settings.source_lang.clone(),
                bucket_capacity: settings.bucket_capacity,
                refill_interval: settings.refill_interval,
            },
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_lang: "ru".to_string(),
            long_text_words: 5,
            cache_capacity: DEFAULT_CAPACITY,
            cache_dir: None,
            glossary_dir: PathBuf::from("glossaries"),
            quantifiers: QuantifierSet::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct LoadedGlossary {
    lang: Option<String>,
    store: GlossaryStore,
}

/// Cache, then glossary, then the remote dispatcher. The only entry point
/// the scan and overlay code use.
pub struct Resolver<P: Provider = ProviderImpl> {
    config: ResolverConfig,
    glossary: RwLock<LoadedGlossary>,
    caches: Mutex<HashMap<String, Arc<TranslationCache>>>,
    dispatcher: Dispatcher<P>,
    outcomes: tokio::sync::Mutex<OutcomeReceiver>,
}

impl<P: Provider> Resolver<P> {
    /// `provider` is `None` when no credential is configured; misses then
    /// pass through untranslated.
    pub fn new(config: ResolverConfig, provider: Option<P>, runtime: Handle) -> Self {
        let (dispatcher, outcomes) = Dispatcher::new(provider, config.dispatcher.clone(), runtime);
        Self {
            config,
            glossary: RwLock::new(LoadedGlossary::default()),
            caches: Mutex::new(HashMap::new()),
            dispatcher,
            outcomes: tokio::sync::Mutex::new(outcomes),
        }
    }

    pub fn default_lang(&self) -> &str {
        &self.config.default_lang
    }

    /// Loads the glossary and cache for `lang`, replacing the previous
    /// glossary wholesale. The old glossary stays active if reading fails.
    pub fn select_language(&self, lang: &str) -> Result<LoadReport> {
        let lang = self.effective_lang(lang);
        let dir = self.config.glossary_dir.join(&lang);
        let mut fresh = GlossaryStore::new();
        let report = load_language_dir(&mut fresh, &dir, &lang)?;
        info!(
            "glossary loaded ({}): {} entries from {} records in {} files, {} lines skipped",
            lang,
            fresh.total_len(),
            report.records,
            report.files,
            report.skipped_lines
        );
        {
            let mut loaded = self.write_glossary();
            loaded.lang = Some(lang.clone());
            loaded.store = fresh;
        }
        self.cache_for(&lang);
        Ok(report)
    }

    /// Resolves one candidate. Cache and glossary answers are immediate;
    /// a miss goes to the remote dispatcher.
    pub fn resolve(&self, request: TranslationRequest) -> Resolution {
        if request.source.trim().is_empty() {
            return Resolution::Ready {
                text: request.source,
                origin: Origin::Empty,
            };
        }
        let lang = self.effective_lang(&request.target_lang);
        self.ensure_language(&lang);
        let cache = self.cache_for(&lang);

        if let Some((text, origin)) = self.lookup_in(&cache, &request.source, request.category, &lang)
        {
            return Resolution::Ready { text, origin };
        }

        let dispatch = self.dispatcher.dispatch(
            DispatchRequest {
                identity: request.identity,
                source: request.source.clone(),
                target_lang: lang,
                category: request.category,
            },
            cache,
        );
        match dispatch {
            Dispatch::Passthrough => Resolution::Ready {
                text: request.source,
                origin: Origin::Passthrough,
            },
            Dispatch::Spawned => Resolution::Pending,
            Dispatch::Duplicate => Resolution::Deferred(DeferReason::InFlight),
            Dispatch::RateLimited => Resolution::Deferred(DeferReason::RateLimited),
        }
    }

    /// Synchronous cache and glossary lookup. Touches only what is already
    /// loaded: no file reads and no remote calls.
    pub fn lookup(&self, source: &str, category: Category, lang: &str) -> Option<(String, Origin)> {
        if source.trim().is_empty() {
            return Some((source.to_string(), Origin::Empty));
        }
        let lang = self.effective_lang(lang);
        let cache = self.lock_caches().get(&lang).cloned();
        match cache {
            Some(cache) => self.lookup_in(&cache, source, category, &lang),
            None => self
                .match_glossary(source, category, &lang)
                .map(|(text, layer)| (match_case(source, &text), Origin::Glossary(layer))),
        }
    }

    /// Outcomes of finished remote calls since the last drain. Callers check
    /// [`TranslationOutcome::is_current_for`] before applying each one.
    pub fn drain(&self) -> Vec<TranslationOutcome> {
        let Ok(mut receiver) = self.outcomes.try_lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(outcome) = receiver.try_recv() {
            drained.push(outcome);
        }
        drained
    }

    /// Waits for the next remote outcome.
    pub async fn next_outcome(&self) -> Option<TranslationOutcome> {
        self.outcomes.lock().await.recv().await
    }

    /// Number of remote calls still running.
    pub fn pending(&self) -> usize {
        self.dispatcher.in_flight().len()
    }

    /// Writes every dirty cache. Failures are logged and skipped; returns
    /// how many files were written.
    pub fn persist(&self) -> usize {
        let caches: Vec<(String, Arc<TranslationCache>)> = self
            .lock_caches()
            .iter()
            .map(|(lang, cache)| (lang.clone(), cache.clone()))
            .collect();
        let mut written = 0;
        for (lang, cache) in caches {
            match cache.persist_snapshot() {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    "failed to save translation cache ({}, {}): {:#}",
                    lang,
                    FailureKind::Persistence,
                    err
                ),
            }
        }
        written
    }

    fn lookup_in(
        &self,
        cache: &TranslationCache,
        source: &str,
        category: Category,
        lang: &str,
    ) -> Option<(String, Origin)> {
        if let Some(cached) = cache.get(source) {
            return Some((match_case(source, &cached), Origin::Cache));
        }
        let (text, layer) = self.match_glossary(source, category, lang)?;
        // Cased the same way a later cache hit will be.
        let shown = match_case(source, &text);
        cache.put(source, text);
        Some((shown, Origin::Glossary(layer)))
    }

    fn match_glossary(&self, source: &str, category: Category, lang: &str) -> Option<(String, MatchLayer)> {
        let loaded = self.read_glossary();
        if loaded.lang.as_deref() != Some(lang) {
            return None;
        }
        let matcher = GlossaryMatcher::new(&loaded.store, &self.config.quantifiers);
        let outcome = if word_count(source) > self.config.long_text_words {
            matcher.match_exact_only(source, category)
        } else {
            matcher.match_text(source, category)
        };
        let layer = outcome.layer()?;
        let text = outcome.into_text()?;
        Some((text, layer))
    }

    fn ensure_language(&self, lang: &str) {
        if self.read_glossary().lang.as_deref() == Some(lang) {
            return;
        }
        if let Err(err) = self.select_language(lang) {
            warn!("failed to load glossary ({}): {:#}", lang, err);
            // Remember the language anyway so the next tick does not retry.
            let mut loaded = self.write_glossary();
            loaded.lang = Some(lang.to_string());
            loaded.store = GlossaryStore::new();
        }
    }

    fn cache_for(&self, lang: &str) -> Arc<TranslationCache> {
        let mut caches = self.lock_caches();
        if let Some(cache) = caches.get(lang) {
            return cache.clone();
        }
        let cache = match &self.config.cache_dir {
            Some(dir) => {
                let cache = TranslationCache::with_path(
                    self.config.cache_capacity,
                    paths::cache_file(dir, lang),
                );
                let loaded = cache.load_snapshot();
                debug!("translation cache ready ({}): {} entries", lang, loaded);
                cache
            }
            None => TranslationCache::new(self.config.cache_capacity),
        };
        let cache = Arc::new(cache);
        caches.insert(lang.to_string(), cache.clone());
        cache
    }

    fn effective_lang(&self, lang: &str) -> String {
        let lang = lang.trim();
        if lang.is_empty() {
            self.config.default_lang.clone()
        } else {
            lang.to_lowercase()
        }
    }

    fn lock_caches(&self) -> MutexGuard<'_, HashMap<String, Arc<TranslationCache>>> {
        self.caches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_glossary(&self) -> std::sync::RwLockReadGuard<'_, LoadedGlossary> {
        self.glossary
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_glossary(&self) -> std::sync::RwLockWriteGuard<'_, LoadedGlossary> {
        self.glossary
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
