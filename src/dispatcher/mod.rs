use anyhow::{Result, anyhow};
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::cache::TranslationCache;
use crate::casing::match_case;
use crate::glossary::Category;
use crate::providers::{Provider, RemoteRequest};

mod in_flight;
mod rate_limit;

pub use in_flight::{Claim, InFlightGuard, InFlightSet};
pub use rate_limit::{DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_INTERVAL, TokenBucket};

/// Opaque handle the consumer uses to find where a result belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub u64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Persistence,
    ConfigurationGap,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Persistence => "persistence",
            FailureKind::ConfigurationGap => "configuration-gap",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Translated,
    Fallback(FailureKind),
}

/// A finished remote request, delivered through the result channel.
///
/// `source` is the text that was requested, not whatever the consumer is
/// tracking now; compare with [`TranslationOutcome::is_current_for`] before
/// applying `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub identity: Identity,
    pub source: String,
    pub text: String,
    pub status: OutcomeStatus,
}

impl TranslationOutcome {
    pub fn is_current_for(&self, tracked: &str) -> bool {
        self.source == tracked
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.status, OutcomeStatus::Fallback(_))
    }
}

/// Result of one remote call after the error boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Translated(String),
    Fallback { reason: String },
}

impl From<Result<String>> for RemoteOutcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) if text.trim().is_empty() => RemoteOutcome::Fallback {
                reason: "empty translation".to_string(),
            },
            Ok(text) => RemoteOutcome::Translated(text),
            Err(err) => RemoteOutcome::Fallback {
                reason: format!("{:#}", err),
            },
        }
    }
}

/// What `dispatch` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No credential: the caller should show the source unchanged.
    Passthrough,
    /// A remote call is running; its outcome will arrive on the channel.
    Spawned,
    /// The same source text is already pending; this request was dropped.
    Duplicate,
    /// No token available this cycle; this request was dropped.
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub identity: Identity,
    pub source: String,
    pub target_lang: String,
    pub category: Category,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub source_lang: String,
    pub bucket_capacity: u32,
    pub refill_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            source_lang: "en".to_string(),
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
        }
    }
}

pub type OutcomeReceiver = UnboundedReceiver<TranslationOutcome>;

pub struct Dispatcher<P: Provider> {
    provider: Option<Arc<P>>,
    in_flight: InFlightSet,
    limiter: Mutex<TokenBucket>,
    outcomes: UnboundedSender<TranslationOutcome>,
    runtime: Handle,
    source_lang: String,
}

impl<P: Provider> Dispatcher<P> {
    /// Builds a dispatcher and the receiving end of its result channel.
    /// Remote calls are spawned on `runtime`.
    pub fn new(
        provider: Option<P>,
        config: DispatcherConfig,
        runtime: Handle,
    ) -> (Self, OutcomeReceiver) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            provider: provider.map(Arc::new),
            in_flight: InFlightSet::new(),
            limiter: Mutex::new(TokenBucket::new(
                config.bucket_capacity,
                config.refill_interval,
            )),
            outcomes,
            runtime,
            source_lang: config.source_lang,
        };
        (dispatcher, receiver)
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Starts a remote call for `request` unless it is a duplicate of a
    /// pending one or the rate limiter refuses it. Never blocks; a successful
    /// translation is stored in `cache` before its outcome is sent.
    pub fn dispatch(&self, request: DispatchRequest, cache: Arc<TranslationCache>) -> Dispatch {
        let Some(provider) = self.provider.clone() else {
            debug!(
                "no remote credential ({}), passing through: {}",
                FailureKind::ConfigurationGap,
                request.source
            );
            return Dispatch::Passthrough;
        };

        let guard = match self
            .in_flight
            .try_claim_with(&request.source, || self.acquire_token())
        {
            Claim::Claimed(guard) => guard,
            Claim::Duplicate => {
                debug!("already in flight, dropped: {}", request.source);
                return Dispatch::Duplicate;
            }
            Claim::Refused => {
                debug!("rate limited, deferred: {}", request.source);
                return Dispatch::RateLimited;
            }
        };

        let remote = RemoteRequest {
            text: request.source.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            category: request.category,
        };
        let outcomes = self.outcomes.clone();
        self.runtime.spawn(async move {
            let outcome = run_remote(provider.as_ref(), &remote).await;
            let outcome = settle(request, outcome, &cache);
            drop(guard);
            if outcomes.send(outcome).is_err() {
                debug!("result channel closed, outcome dropped");
            }
        });
        Dispatch::Spawned
    }

    fn acquire_token(&self) -> bool {
        self.limiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .try_acquire()
    }
}

async fn run_remote<P: Provider>(provider: &P, request: &RemoteRequest) -> RemoteOutcome {
    let call = AssertUnwindSafe(provider.translate(request)).catch_unwind();
    match call.await {
        Ok(result) => RemoteOutcome::from(result),
        Err(_) => RemoteOutcome::from(Err(anyhow!("{} transport panicked", provider.name()))),
    }
}

fn settle(
    request: DispatchRequest,
    outcome: RemoteOutcome,
    cache: &TranslationCache,
) -> TranslationOutcome {
    let (text, status) = match outcome {
        RemoteOutcome::Translated(translated) => {
            let text = match_case(&request.source, &translated);
            cache.put(request.source.clone(), translated);
            (text, OutcomeStatus::Translated)
        }
        RemoteOutcome::Fallback { reason } => {
            warn!(
                "remote translation failed ({}), using source text for '{}': {}",
                FailureKind::Transport,
                request.source,
                reason
            );
            (
                request.source.clone(),
                OutcomeStatus::Fallback(FailureKind::Transport),
            )
        }
    };
    TranslationOutcome {
        identity: request.identity,
        source: request.source,
        text,
        status,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::ProviderFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// In-memory transport. Replies are looked up by source text; unknown
    /// texts fail. Calls wait on `gate` so tests can hold them pending.
    pub(crate) struct ScriptedProvider {
        replies: HashMap<String, Result<String, String>>,
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProvider {
        pub(crate) fn new() -> Self {
            Self {
                replies: HashMap::new(),
                gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn held() -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                ..Self::new()
            }
        }

        pub(crate) fn reply(mut self, source: &str, translation: &str) -> Self {
            self.replies
                .insert(source.to_string(), Ok(translation.to_string()));
            self
        }

        pub(crate) fn fail(mut self, source: &str, message: &str) -> Self {
            self.replies
                .insert(source.to_string(), Err(message.to_string()));
            self
        }

        pub(crate) fn gate(&self) -> Arc<Semaphore> {
            self.gate.clone()
        }

        pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    impl Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn translate(&self, request: &RemoteRequest) -> ProviderFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .replies
                .get(&request.text)
                .cloned()
                .unwrap_or_else(|| Err(format!("no script for '{}'", request.text)));
            let gate = self.gate.clone();
            async move {
                let _permit = gate.acquire_owned().await?;
                reply.map_err(|message| anyhow!(message))
            }
            .boxed()
        }
    }

    struct PanickingProvider;

    impl Provider for PanickingProvider {
        fn name(&self) -> &'static str {
            "Panicking"
        }

        fn translate(&self, _request: &RemoteRequest) -> ProviderFuture {
            explode().boxed()
        }
    }

    async fn explode() -> Result<String> {
        panic!("connection reset")
    }

    fn request(identity: u64, source: &str) -> DispatchRequest {
        DispatchRequest {
            identity: Identity(identity),
            source: source.to_string(),
            target_lang: "ru".to_string(),
            category: Category::Action,
        }
    }

    fn config(capacity: u32) -> DispatcherConfig {
        DispatcherConfig {
            bucket_capacity: capacity,
            refill_interval: Duration::from_secs(3600),
            ..DispatcherConfig::default()
        }
    }

    #[tokio::test]
    async fn concurrent_identical_requests_make_one_call() {
        let provider = ScriptedProvider::held().reply("Bank", "Банк");
        let gate = provider.gate();
        let calls = provider.calls();
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(provider), config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        assert_eq!(
            dispatcher.dispatch(request(1, "Bank"), cache.clone()),
            Dispatch::Spawned
        );
        assert_eq!(
            dispatcher.dispatch(request(2, "Bank"), cache.clone()),
            Dispatch::Duplicate
        );
        gate.add_permits(8);

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.identity, Identity(1));
        assert_eq!(outcome.text, "Банк");
        assert_eq!(outcome.status, OutcomeStatus::Translated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes.try_recv().is_err());
        assert_eq!(cache.peek("Bank").as_deref(), Some("Банк"));
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn requests_past_bucket_capacity_are_abandoned() {
        let provider = ScriptedProvider::new()
            .reply("Chop", "Рубить")
            .reply("Mine", "Добыть")
            .reply("Fish", "Рыбачить");
        let calls = provider.calls();
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(provider), config(2), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        assert_eq!(
            dispatcher.dispatch(request(1, "Chop"), cache.clone()),
            Dispatch::Spawned
        );
        assert_eq!(
            dispatcher.dispatch(request(2, "Mine"), cache.clone()),
            Dispatch::Spawned
        );
        assert_eq!(
            dispatcher.dispatch(request(3, "Fish"), cache.clone()),
            Dispatch::RateLimited
        );
        assert!(!dispatcher.in_flight().contains("Fish"));

        outcomes.recv().await.unwrap();
        outcomes.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.contains("Fish"));
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_source() {
        let provider = ScriptedProvider::new().fail("Bank", "503 Service Unavailable");
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(provider), config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        dispatcher.dispatch(request(7, "Bank"), cache.clone());
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.text, "Bank");
        assert_eq!(
            outcome.status,
            OutcomeStatus::Fallback(FailureKind::Transport)
        );
        assert!(cache.is_empty());
        assert!(dispatcher.in_flight().is_empty());

        // Terminal: the same text can be requested again from scratch.
        assert_eq!(
            dispatcher.dispatch(request(8, "Bank"), cache),
            Dispatch::Spawned
        );
    }

    #[tokio::test]
    async fn panicking_transport_still_reports_and_cleans_up() {
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(PanickingProvider), config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        dispatcher.dispatch(request(3, "Smelt"), cache);
        let outcome = outcomes.recv().await.unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.text, "Smelt");
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn success_matches_source_casing_but_caches_raw_reply() {
        let provider = ScriptedProvider::new().reply("TAKE", "взять");
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(provider), config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        dispatcher.dispatch(request(1, "TAKE"), cache.clone());
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.text, "ВЗЯТЬ");
        assert_eq!(cache.peek("TAKE").as_deref(), Some("взять"));
    }

    #[tokio::test]
    async fn outcome_carries_requested_source_for_staleness_check() {
        let provider = ScriptedProvider::held().reply("Bank", "Банк");
        let gate = provider.gate();
        let (dispatcher, mut outcomes) =
            Dispatcher::new(Some(provider), config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        dispatcher.dispatch(request(4, "Bank"), cache);
        // The widget changed while the call was pending.
        let tracked = "Deposit-All";
        gate.add_permits(1);
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.source, "Bank");
        assert!(!outcome.is_current_for(tracked));
        assert!(outcome.is_current_for("Bank"));
    }

    #[tokio::test]
    async fn missing_credential_passes_through() {
        let (dispatcher, mut outcomes) =
            Dispatcher::<ScriptedProvider>::new(None, config(5), Handle::current());
        let cache = Arc::new(TranslationCache::new(16));

        assert!(!dispatcher.has_provider());
        assert_eq!(
            dispatcher.dispatch(request(1, "Bank"), cache),
            Dispatch::Passthrough
        );
        assert!(dispatcher.in_flight().is_empty());
        assert!(outcomes.try_recv().is_err());
    }

    #[test]
    fn blank_reply_is_a_fallback() {
        assert!(matches!(
            RemoteOutcome::from(Ok("  ".to_string())),
            RemoteOutcome::Fallback { .. }
        ));
        assert_eq!(
            RemoteOutcome::from(Ok("Банк".to_string())),
            RemoteOutcome::Translated("Банк".to_string())
        );
    }
}
