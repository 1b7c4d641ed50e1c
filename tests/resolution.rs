use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use futures_util::FutureExt;
use glossary_translator_rust::dispatcher::DispatcherConfig;
use glossary_translator_rust::providers::ProviderFuture;
use glossary_translator_rust::{
    Category, DeferReason, FailureKind, Identity, Origin, OutcomeStatus, Provider, RemoteRequest,
    Resolution, Resolver, ResolverConfig, TranslationRequest, cache_file,
};
use insta::assert_snapshot;
use tokio::runtime::Handle;

/// Answers from a fixed table; anything else is a transport failure.
struct TableProvider {
    table: HashMap<&'static str, &'static str>,
    calls: Arc<AtomicUsize>,
    seen: Arc<std::sync::Mutex<Vec<RemoteRequest>>>,
}

impl TableProvider {
    fn new(entries: &[(&'static str, &'static str)]) -> Self {
        Self {
            table: entries.iter().copied().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Provider for TableProvider {
    fn name(&self) -> &'static str {
        "Table"
    }

    fn translate(&self, request: &RemoteRequest) -> ProviderFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let reply = self.table.get(request.text.as_str()).map(|text| text.to_string());
        let source = request.text.clone();
        async move { reply.ok_or_else(|| anyhow!("HTTP 500 for '{}'", source)) }.boxed()
    }
}

fn write_glossary(root: &Path) {
    let ru = root.join("ru");
    fs::create_dir_all(&ru).unwrap();
    fs::write(
        ru.join("action.tsv"),
        "# verbs\nEnglish\tru\nTake\tВзять\nDrop\tБросить\nWithdraw\tСнять\nTalk-to\tГоворить с\n",
    )
    .unwrap();
    fs::write(ru.join("npc.tsv"), "Banker    Банкир\nCook  Повар\n").unwrap();
    fs::write(ru.join("default.tsv"), "Bank\tБанк\n").unwrap();
}

fn config(glossary: &Path, cache: Option<&Path>, bucket: u32, refill: Duration) -> ResolverConfig {
    ResolverConfig {
        glossary_dir: glossary.to_path_buf(),
        cache_dir: cache.map(Path::to_path_buf),
        dispatcher: DispatcherConfig {
            bucket_capacity: bucket,
            refill_interval: refill,
            ..DispatcherConfig::default()
        },
        ..ResolverConfig::default()
    }
}

fn text_of(resolution: &Resolution) -> &str {
    resolution.text().expect("ready resolution")
}

#[tokio::test]
async fn glossary_layers_resolve_without_remote_calls() {
    let glossary = tempfile::tempdir().unwrap();
    write_glossary(glossary.path());
    let provider = TableProvider::new(&[]);
    let calls = provider.calls.clone();
    let resolver = Resolver::new(
        config(glossary.path(), None, 5, Duration::from_secs(1)),
        Some(provider),
        Handle::current(),
    );

    let cases = [
        ("Take", Category::Action, "Взять"),
        ("<col=ff9040>Banker</col>", Category::Npc, "Банкир"),
        ("Withdraw-10", Category::Action, "Снять-10"),
        ("Drop All", Category::Action, "Бросить-All"),
        ("Talk-to Cook", Category::Action, "Говорить с Cook"),
        ("Bank", Category::Item, "Банк"),
    ];
    for (idx, (source, category, expected)) in cases.into_iter().enumerate() {
        let resolution = resolver.resolve(TranslationRequest::new(
            source,
            Identity(idx as u64),
            category,
        ));
        assert_eq!(text_of(&resolution), expected, "source: {}", source);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_results_persist_and_reload_as_cache_hits() {
    let glossary = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    write_glossary(glossary.path());

    {
        let provider = TableProvider::new(&[("Goblin", "Гоблин")]);
        let seen = provider.seen.clone();
        let resolver = Resolver::new(
            config(glossary.path(), Some(cache_dir.path()), 5, Duration::from_secs(1)),
            Some(provider),
            Handle::current(),
        );
        resolver.select_language("").unwrap();

        let banker = resolver.resolve(TranslationRequest::new("Banker", Identity(1), Category::Npc));
        assert_eq!(text_of(&banker), "Банкир");
        let goblin = resolver.resolve(TranslationRequest::new("Goblin", Identity(2), Category::Npc));
        assert_eq!(goblin, Resolution::Pending);

        let outcome = resolver.next_outcome().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Translated);
        assert_eq!(outcome.text, "Гоблин");
        let request = seen.lock().unwrap()[0].clone();
        assert_eq!(request.source_lang, "en");
        assert_eq!(request.target_lang, "ru");
        assert_eq!(request.category, Category::Npc);

        assert_eq!(resolver.persist(), 1);
    }

    let written = fs::read_to_string(cache_file(cache_dir.path(), "ru")).unwrap();
    assert_snapshot!(written.trim_end(), @r#"
    {
      "Banker": "Банкир",
      "Goblin": "Гоблин"
    }
    "#);

    // A later session without any credential still serves the cached text.
    let resolver: Resolver<TableProvider> = Resolver::new(
        config(glossary.path(), Some(cache_dir.path()), 5, Duration::from_secs(1)),
        None,
        Handle::current(),
    );
    let resolution = resolver.resolve(TranslationRequest::new("GOBLIN", Identity(9), Category::Npc));
    assert_eq!(
        resolution,
        Resolution::Ready {
            text: "GOBLIN".to_string(),
            origin: Origin::Passthrough,
        }
    );
    let resolution = resolver.resolve(TranslationRequest::new("Goblin", Identity(9), Category::Npc));
    assert_eq!(
        resolution,
        Resolution::Ready {
            text: "Гоблин".to_string(),
            origin: Origin::Cache,
        }
    );
}

#[tokio::test]
async fn stale_outcomes_are_discarded_by_the_consumer() {
    let glossary = tempfile::tempdir().unwrap();
    write_glossary(glossary.path());
    let provider = TableProvider::new(&[("Deposit", "Положить"), ("Goblin", "Гоблин")]);
    let resolver = Resolver::new(
        config(glossary.path(), None, 5, Duration::from_secs(1)),
        Some(provider),
        Handle::current(),
    );

    // What each on-screen widget shows right now.
    let mut tracked: HashMap<Identity, String> = HashMap::new();
    let mut painted: HashMap<Identity, String> = HashMap::new();
    tracked.insert(Identity(1), "Deposit".to_string());
    tracked.insert(Identity(2), "Goblin".to_string());
    for (identity, source) in &tracked {
        let resolution = resolver.resolve(TranslationRequest::new(
            source.clone(),
            *identity,
            Category::Interface,
        ));
        assert_eq!(resolution, Resolution::Pending);
    }
    // Widget 1 is reused for another string before its result lands.
    tracked.insert(Identity(1), "Withdraw-5".to_string());

    let mut received = Vec::new();
    while received.len() < 2 {
        received.push(resolver.next_outcome().await.unwrap());
    }
    for outcome in received {
        let current = &tracked[&outcome.identity];
        if outcome.is_current_for(current) {
            painted.insert(outcome.identity, outcome.text);
        }
    }

    assert_eq!(painted.get(&Identity(2)).map(String::as_str), Some("Гоблин"));
    assert!(!painted.contains_key(&Identity(1)));
}

#[tokio::test]
async fn failures_fall_back_and_rate_limit_defers_to_later_ticks() {
    let glossary = tempfile::tempdir().unwrap();
    write_glossary(glossary.path());
    let provider = TableProvider::new(&[("Goblin", "Гоблин")]);
    let calls = provider.calls.clone();
    let resolver = Resolver::new(
        config(glossary.path(), None, 1, Duration::from_millis(50)),
        Some(provider),
        Handle::current(),
    );

    let first = resolver.resolve(TranslationRequest::new("Imp", Identity(1), Category::Npc));
    assert_eq!(first, Resolution::Pending);
    let second = resolver.resolve(TranslationRequest::new("Goblin", Identity(2), Category::Npc));
    assert_eq!(second, Resolution::Deferred(DeferReason::RateLimited));

    let failed = resolver.next_outcome().await.unwrap();
    assert_eq!(failed.text, "Imp");
    assert_eq!(failed.status, OutcomeStatus::Fallback(FailureKind::Transport));

    tokio::time::sleep(Duration::from_millis(80)).await;
    let retried = resolver.resolve(TranslationRequest::new("Goblin", Identity(2), Category::Npc));
    assert_eq!(retried, Resolution::Pending);
    let outcome = resolver.next_outcome().await.unwrap();
    assert_eq!(outcome.text, "Гоблин");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(resolver.drain().is_empty());
}
