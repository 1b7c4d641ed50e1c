use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

pub mod cache;
pub mod casing;
pub mod dispatcher;
pub mod glossary;
pub mod logging;
pub mod normalize;
mod paths;
pub mod providers;
pub mod resolver;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod tokenize;

pub use cache::TranslationCache;
pub use dispatcher::{FailureKind, Identity, OutcomeStatus, TranslationOutcome};
pub use glossary::{Category, GlossaryMatcher, GlossaryRecord, GlossaryStore, MatchOutcome};
pub use paths::cache_file;
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderImpl, ProviderKind, RemoteRequest};
pub use resolver::{
    DeferReason, Origin, Resolution, Resolver, ResolverConfig, TranslationRequest,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Target language; `None` uses the settings default.
    pub lang: Option<String>,
    /// Category for lines without a `category<TAB>` prefix.
    pub category: Category,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub glossary_dir: Option<String>,
    pub cache_dir: Option<String>,
}

/// Resolves every candidate line of `input` and returns
/// `source<TAB>translation` lines in input order.
pub async fn run(config: Config, input: String) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    let mut resolver_config = ResolverConfig::from_settings(&settings);
    if config.glossary_dir.is_some() {
        resolver_config.glossary_dir =
            paths::resolve_dir(config.glossary_dir.as_deref(), paths::glossary_dir);
    }
    if config.cache_dir.is_some() {
        resolver_config.cache_dir = Some(paths::resolve_dir(
            config.cache_dir.as_deref(),
            paths::cache_dir,
        ));
    }
    let refill_interval = resolver_config.dispatcher.refill_interval;

    let model = config.model.clone().or_else(|| settings.model.clone());
    let provider = build_remote(model.as_deref(), config.key.as_deref(), settings.timeout)?;
    let resolver = Resolver::new(resolver_config, provider, Handle::current());

    let lang = config
        .lang
        .clone()
        .filter(|lang| !lang.trim().is_empty())
        .unwrap_or_else(|| resolver.default_lang().to_string());
    if let Err(err) = resolver.select_language(&lang) {
        warn!("failed to load glossary ({}): {:#}", lang, err);
    }

    let mut rows = parse_candidates(&input, config.category);
    drive(&resolver, &mut rows, &lang, refill_interval).await;
    let written = resolver.persist();
    info!("translation caches written: {}", written);

    Ok(rows
        .iter()
        .map(|row| {
            let text = row.text.as_deref().unwrap_or(&row.source);
            format!("{}\t{}", row.source, text)
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    source: String,
    category: Category,
    text: Option<String>,
}

fn parse_candidates(input: &str, default_category: Category) -> Vec<Row> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (category, source) = match line.split_once('\t') {
                Some((prefix, rest)) => match prefix.parse::<Category>() {
                    Ok(category) => (category, rest),
                    Err(_) => (default_category, line),
                },
                None => (default_category, line),
            };
            Row {
                source: source.trim().to_string(),
                category,
                text: None,
            }
        })
        .collect()
}

/// Runs driver ticks until every row has a text. A tick resolves the open
/// rows in order and then waits for the remote calls it started; rows
/// refused by the rate limiter are retried on the next tick.
async fn drive<P: Provider>(
    resolver: &Resolver<P>,
    rows: &mut [Row],
    lang: &str,
    refill_interval: Duration,
) {
    loop {
        let mut spawned = 0usize;
        let mut rate_limited = false;
        for (idx, row) in rows.iter_mut().enumerate() {
            if row.text.is_some() {
                continue;
            }
            let request = TranslationRequest::new(row.source.clone(), Identity(idx as u64), row.category)
                .with_lang(lang);
            match resolver.resolve(request) {
                Resolution::Ready { text, .. } => row.text = Some(text),
                Resolution::Pending => spawned += 1,
                Resolution::Deferred(DeferReason::InFlight) => {}
                Resolution::Deferred(DeferReason::RateLimited) => rate_limited = true,
            }
        }

        for _ in 0..spawned {
            let Some(outcome) = resolver.next_outcome().await else {
                break;
            };
            for row in rows.iter_mut() {
                if row.text.is_none() && outcome.is_current_for(&row.source) {
                    row.text = Some(outcome.text.clone());
                }
            }
        }

        if rows.iter().all(|row| row.text.is_some()) {
            return;
        }
        if !rate_limited && spawned == 0 {
            // Nothing left that another tick could change.
            for row in rows.iter_mut().filter(|row| row.text.is_none()) {
                row.text = Some(row.source.clone());
            }
            return;
        }
        if rate_limited {
            tokio::time::sleep(refill_interval).await;
        }
    }
}

fn build_remote(
    model: Option<&str>,
    key: Option<&str>,
    timeout: Duration,
) -> Result<Option<ProviderImpl>> {
    let Some(selection) = providers::resolve_provider_selection(model, key)? else {
        info!(
            "no remote credential ({}); glossary misses pass through",
            FailureKind::ConfigurationGap
        );
        return Ok(None);
    };
    let Some(key) = providers::resolve_key(selection.provider, key) else {
        warn!(
            "no API key for {} ({}); glossary misses pass through",
            selection.provider.as_str(),
            FailureKind::ConfigurationGap
        );
        return Ok(None);
    };
    let provider =
        providers::build_provider(selection.provider, key, selection.requested_model, timeout)?;
    info!("remote fallback: {}", provider.name());
    Ok(Some(provider))
}
