use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use parley_core::audit::{AuditContext, AuditSink, NoopAuditSink};
use parley_core::catalog::{
    CatalogCache, CatalogError, CatalogProvider, IntentCatalog, TomlIntentSource,
};
use parley_core::config::AppConfig;
use parley_core::dialogue::{DialogueEngine, DialoguePolicy};
use parley_core::domain::decision::{DialogueAction, DialogueDecision};
use parley_core::domain::intent::{ApiDetails, IntentDefinition};
use parley_core::domain::utterance::{ThreadId, Utterance};
use parley_core::errors::ApplicationError;
use parley_db::{ConversationStore, DbPool, SqlConversationStore, SqlIntentSource};

use crate::action::{ActionClient, ActionError, ActionRequest, HttpActionClient};
use crate::classifier::{
    ClassifierBackend, IntentEnsemble, StatisticalClassifier, ZeroShotClassifier,
};
use crate::featurizer::{FeatureSet, Featurizer};
use crate::llm;
use crate::pipeline::NluPipeline;
use crate::render::ResponseRenderer;

const AUDIT_ACTOR: &str = "dialogue-runtime";

/// Runs one conversational turn end to end: load state, understand the
/// utterance, decide, persist under optimistic concurrency, render.
///
/// Turns on the same thread are serialized in-process; the store's version
/// check guards against writers in other processes.
pub struct DialogueRuntime {
    pipeline: NluPipeline,
    engine: DialogueEngine,
    store: Arc<dyn ConversationStore>,
    catalog: Arc<dyn CatalogProvider>,
    renderer: ResponseRenderer,
    audit: Arc<dyn AuditSink>,
    actions: Arc<dyn ActionClient>,
    api_timeout: Duration,
    thread_locks: Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>,
    save_retries: u32,
}

impl DialogueRuntime {
    pub fn new(
        config: &AppConfig,
        pipeline: NluPipeline,
        store: Arc<dyn ConversationStore>,
        catalog: Arc<dyn CatalogProvider>,
    ) -> Self {
        let api_timeout = Duration::from_secs(config.dialogue.api_timeout_secs.max(1));
        Self {
            pipeline,
            engine: DialogueEngine::new(DialoguePolicy::from_config(config)),
            store,
            catalog,
            renderer: ResponseRenderer::from_config(&config.dialogue),
            audit: Arc::new(NoopAuditSink),
            actions: Arc::new(HttpActionClient::new(api_timeout)),
            api_timeout,
            thread_locks: Mutex::new(HashMap::new()),
            save_retries: config.dialogue.save_retries.max(1),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_action_client(mut self, actions: Arc<dyn ActionClient>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_api_timeout(mut self, api_timeout: Duration) -> Self {
        self.api_timeout = api_timeout;
        self
    }

    /// Builds the production runtime: language model, catalog, classifier
    /// backends and the SQL conversation store. Any failure here is an
    /// initialization failure and should stop the process.
    pub async fn bootstrap(config: &AppConfig, pool: DbPool) -> Result<Self, ApplicationError> {
        let featurizer = Featurizer::from_path(
            config.nlu.language_model_path.as_deref(),
            config.nlu.embedding_dim,
        )
        .map_err(|error| ApplicationError::Initialization(error.to_string()))?;

        let catalog: Arc<dyn CatalogProvider> = match &config.nlu.catalog_path {
            Some(path) => Arc::new(CatalogCache::load(TomlIntentSource::new(path)).await?),
            None => Arc::new(CatalogCache::load(SqlIntentSource::new(pool.clone())).await?),
        };
        let snapshot = catalog.snapshot();

        let statistical = StatisticalClassifier::from_config(
            config.nlu.statistical_model_path.as_deref(),
            &featurizer,
            &snapshot,
            config.nlu.ranking_length,
        )
        .map_err(|error| ApplicationError::Initialization(error.to_string()))?;

        let mut backends = vec![ClassifierBackend::Statistical(statistical)];
        if config.nlu.zero_shot_enabled {
            let client = llm::client_from_config(&config.llm)
                .map_err(|error| ApplicationError::Initialization(error.to_string()))?;
            let zero_shot = ZeroShotClassifier::new(client, llm::call_timeout(&config.llm))
                .with_max_retries(config.llm.max_retries);
            backends.push(ClassifierBackend::ZeroShot(zero_shot));
        }

        // room for every zero-shot attempt before the ensemble gives up
        let attempts = config.llm.max_retries.saturating_add(1);
        let ensemble = IntentEnsemble::new(backends, config.nlu.confidence_threshold)
            .with_backend_timeout(llm::call_timeout(&config.llm).saturating_mul(attempts));
        let pipeline = NluPipeline::new(featurizer, ensemble, &snapshot)
            .map_err(|error| ApplicationError::Initialization(error.to_string()))?;

        info!(
            event_name = "runtime.bootstrapped",
            generation = snapshot.generation(),
            intents = snapshot.intents().len(),
            backends = ?pipeline.ensemble().backend_names(),
            "dialogue runtime ready"
        );

        let store = Arc::new(SqlConversationStore::new(pool));
        Ok(Self::new(config, pipeline, store, catalog))
    }

    pub fn pipeline(&self) -> &NluPipeline {
        &self.pipeline
    }

    pub fn catalog(&self) -> Arc<IntentCatalog> {
        self.catalog.snapshot()
    }

    pub fn catalog_generation(&self) -> u64 {
        self.catalog.snapshot().generation()
    }

    /// Turns on which every classifier backend failed.
    pub fn nlu_failure_count(&self) -> u64 {
        self.pipeline.ensemble().failure_count()
    }

    /// Reloads the catalog from its source and prepares the pipeline for it.
    /// On failure the previous snapshot stays active.
    pub async fn refresh_catalog(&self) -> Result<u64, CatalogError> {
        let generation = self.catalog.refresh().await?;
        self.pipeline.prepare(&self.catalog.snapshot());
        info!(event_name = "catalog.refreshed", generation, "intent catalog reloaded");
        Ok(generation)
    }

    pub async fn process_turn(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<DialogueDecision, ApplicationError> {
        self.process_utterance(Utterance::new(thread_id, text)).await
    }

    /// Turn from a channel that does not guarantee UTF-8. Malformed input is
    /// understood as nothing (empty features) and the turn still decides.
    pub async fn process_raw_turn(
        &self,
        thread_id: &str,
        raw: &[u8],
    ) -> Result<DialogueDecision, ApplicationError> {
        let features = self.pipeline.featurizer().featurize_bytes(raw);
        let utterance = Utterance::new(thread_id, String::from_utf8_lossy(raw).into_owned());
        self.process(utterance, Some(features)).await
    }

    pub async fn process_utterance(
        &self,
        utterance: Utterance,
    ) -> Result<DialogueDecision, ApplicationError> {
        self.process(utterance, None).await
    }

    async fn process(
        &self,
        utterance: Utterance,
        features: Option<FeatureSet>,
    ) -> Result<DialogueDecision, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let lock = self.thread_lock(&utterance.thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.process_locked(&utterance, features.as_ref(), &correlation_id).await
        };
        self.release_thread_lock(&utterance.thread_id, lock).await;
        result
    }

    async fn process_locked(
        &self,
        utterance: &Utterance,
        features: Option<&FeatureSet>,
        correlation_id: &str,
    ) -> Result<DialogueDecision, ApplicationError> {
        let thread_id = &utterance.thread_id;
        let catalog = match self.catalog.current().await {
            Ok(catalog) => catalog,
            Err(error) => {
                warn!(
                    event_name = "catalog.reload_failed",
                    thread_id = %thread_id,
                    correlation_id,
                    error = %error,
                    "catalog reload failed, using the previous snapshot"
                );
                self.catalog.snapshot()
            }
        };
        self.pipeline.prepare(&catalog);

        let audit = AuditContext::new(Some(thread_id.to_string()), correlation_id, AUDIT_ACTOR);
        for attempt in 1..=self.save_retries {
            let state = self
                .store
                .load(thread_id)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

            let active_intent = state.active_intent();
            let nlu = match features {
                Some(features) => {
                    self.pipeline.parse_features(utterance, features, &catalog, active_intent).await
                }
                None => self.pipeline.parse(utterance, &catalog, active_intent).await,
            };
            let (mut decision, event) =
                self.engine.decide_audited(&state, &nlu, utterance, &catalog, &audit);

            match self.store.save(thread_id, &decision.state, state.version).await {
                Ok(()) => {
                    self.audit.emit(event);
                    decision.messages = self.respond(&decision, &catalog, correlation_id).await;
                    info!(
                        event_name = "dialogue.turn.decided",
                        thread_id = %thread_id,
                        correlation_id,
                        intent = nlu.matched_intent_name().unwrap_or("none"),
                        node = ?decision.node,
                        action = decision.action.action_key(),
                        version = decision.state.version,
                        excluded_backends = nlu.excluded_backends.len(),
                        "dialogue turn decided"
                    );
                    return Ok(decision);
                }
                Err(error) if error.is_version_conflict() => {
                    warn!(
                        event_name = "store.version_conflict",
                        thread_id = %thread_id,
                        correlation_id,
                        attempt,
                        error = %error,
                        "conversation changed concurrently, recomputing the turn"
                    );
                }
                Err(error) => return Err(ApplicationError::Persistence(error.to_string())),
            }
        }

        Err(ApplicationError::VersionConflict {
            thread_id: thread_id.to_string(),
            attempts: self.save_retries,
        })
    }

    /// Renders the committed decision. An executed API-triggered intent makes
    /// its call first; a failed call replaces the response with the API
    /// failure message.
    async fn respond(
        &self,
        decision: &DialogueDecision,
        catalog: &IntentCatalog,
        correlation_id: &str,
    ) -> Vec<String> {
        let DialogueAction::Execute { intent, slots } = &decision.action else {
            return self.renderer.render(decision, catalog);
        };
        let Some(details) = catalog.intent(intent).and_then(IntentDefinition::api_call) else {
            return self.renderer.render(decision, catalog);
        };

        match self.call_api(details, intent, slots, &decision.state.context).await {
            Ok(result) => {
                info!(
                    event_name = "dialogue.api.called",
                    thread_id = %decision.state.thread_id,
                    correlation_id,
                    intent = %intent,
                    method = details.method.as_str(),
                    "intent api call succeeded"
                );
                self.renderer.render_with_result(decision, catalog, Some(&result))
            }
            Err(error) => {
                warn!(
                    event_name = "dialogue.api.failed",
                    thread_id = %decision.state.thread_id,
                    correlation_id,
                    intent = %intent,
                    error = %error,
                    "intent api call failed, answering with the failure message"
                );
                self.renderer.api_failure()
            }
        }
    }

    async fn call_api(
        &self,
        details: &ApiDetails,
        intent: &str,
        slots: &BTreeMap<String, String>,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ActionError> {
        let request = ActionRequest::render(details, intent, slots, context)?;
        tokio::time::timeout(self.api_timeout, self.actions.call(&request))
            .await
            .unwrap_or(Err(ActionError::Timeout(self.api_timeout)))
    }

    async fn thread_lock(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        Arc::clone(locks.entry(thread_id.clone()).or_default())
    }

    async fn release_thread_lock(&self, thread_id: &ThreadId, lock: Arc<Mutex<()>>) {
        let mut locks = self.thread_locks.lock().await;
        // the map and this caller hold the only references
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(thread_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use parley_core::audit::InMemoryAuditSink;
    use parley_core::catalog::{CatalogCache, IntentCatalog, StaticIntentSource};
    use parley_core::config::AppConfig;
    use parley_core::dialogue::DialogueNode;
    use parley_core::domain::conversation::ConversationState;
    use parley_core::domain::decision::DialogueAction;
    use parley_core::domain::intent::{
        ApiDetails, EntityDefinition, EntityKind, HttpMethod, IntentDefinition, SlotDefinition,
    };
    use parley_core::domain::nlu::IntentScore;
    use parley_core::domain::utterance::ThreadId;
    use parley_core::errors::ApplicationError;
    use parley_db::{ConversationStore, InMemoryConversationStore, RepositoryError};

    use super::DialogueRuntime;
    use crate::action::{ActionClient, ActionError, ActionRequest};
    use crate::classifier::{BackendError, ClassifierBackend, IntentClassifier, IntentEnsemble};
    use crate::featurizer::{FeatureSet, Featurizer, LanguageModel};
    use crate::pipeline::NluPipeline;

    /// Scores by keyword so tests control the top intent.
    struct Keywords;

    #[async_trait]
    impl IntentClassifier for Keywords {
        fn name(&self) -> &str {
            "keywords"
        }

        async fn classify(
            &self,
            features: &FeatureSet,
            _candidates: &[IntentDefinition],
        ) -> Result<Vec<IntentScore>, BackendError> {
            let has = |word: &str| features.lemmas().any(|lemma| lemma == word);
            let intent = if has("flight") {
                "book_flight"
            } else if has("order") {
                "order_status"
            } else if has("yes") {
                "affirm"
            } else if has("no") {
                "deny"
            } else if has("hello") {
                "greet"
            } else {
                return Ok(vec![IntentScore::new("greet", 0.1)]);
            };
            Ok(vec![IntentScore::new(intent, 0.9)])
        }
    }

    struct Down;

    #[async_trait]
    impl IntentClassifier for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn classify(
            &self,
            _features: &FeatureSet,
            _candidates: &[IntentDefinition],
        ) -> Result<Vec<IntentScore>, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    /// Reports a conflict on the first `conflicts` saves.
    struct Contended {
        inner: InMemoryConversationStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl ConversationStore for Contended {
        async fn load(&self, thread_id: &ThreadId) -> Result<ConversationState, RepositoryError> {
            self.inner.load(thread_id).await
        }

        async fn save(
            &self,
            thread_id: &ThreadId,
            state: &ConversationState,
            expected_version: u64,
        ) -> Result<(), RepositoryError> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::VersionConflict {
                    thread_id: thread_id.to_string(),
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.save(thread_id, state, expected_version).await
        }
    }

    /// Answers every call with `reply` and records the requests it saw.
    struct Shop {
        reply: Result<Value, String>,
        delay: Duration,
        requests: Mutex<Vec<ActionRequest>>,
    }

    impl Shop {
        fn answering(reply: Result<Value, String>) -> Self {
            Self { reply, delay: Duration::ZERO, requests: Mutex::new(Vec::new()) }
        }

        fn requests(&self) -> Vec<ActionRequest> {
            self.requests.lock().expect("requests").clone()
        }
    }

    #[async_trait]
    impl ActionClient for Shop {
        async fn call(&self, request: &ActionRequest) -> Result<Value, ActionError> {
            self.requests.lock().expect("requests").push(request.clone());
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(ActionError::Transport)
        }
    }

    fn catalog() -> IntentCatalog {
        let mut city = EntityDefinition::new("city", EntityKind::Text);
        city.ner_labels = vec!["GPE".to_string()];

        let mut book = IntentDefinition::new("book_flight")
            .with_examples(["book a flight"])
            .with_slot(SlotDefinition::required(
                "destination",
                "city",
                "Where would you like to go?",
            ));
        book.confirmation_template = Some("Fly to {{ slots.destination }}?".to_string());
        book.response_template =
            Some("Booked your flight to {{ slots.destination }}.###Have a nice trip!".to_string());

        let mut greet = IntentDefinition::new("greet").with_examples(["hello"]);
        greet.requires_confirmation = false;
        greet.response_template = Some("Hello!".to_string());

        let mut order_status = IntentDefinition::new("order_status")
            .with_examples(["where is my order"])
            .with_api(ApiDetails::new(
                HttpMethod::Get,
                "https://shop.example/{{ context.customer | default(value='guest') }}/{{ intent }}",
            ));
        order_status.requires_confirmation = false;
        order_status.response_template = Some("Your order is {{ result.status }}.".to_string());

        let intents = vec![
            greet,
            book,
            order_status,
            IntentDefinition::new("affirm").with_examples(["yes"]),
            IntentDefinition::new("deny").with_examples(["no"]),
            IntentDefinition::new("cancel").with_examples(["cancel"]),
        ];
        IntentCatalog::new(intents, vec![city]).expect("catalog")
    }

    async fn runtime_with(
        backend: ClassifierBackend,
        store: Arc<dyn ConversationStore>,
    ) -> DialogueRuntime {
        let config = AppConfig::default();
        let catalog = catalog();
        let featurizer = Featurizer::new(LanguageModel::builtin_english(), 64).expect("featurizer");
        let ensemble = IntentEnsemble::new(vec![backend], config.nlu.confidence_threshold);
        let pipeline = NluPipeline::new(featurizer, ensemble, &catalog).expect("pipeline");
        let provider =
            CatalogCache::load(StaticIntentSource::new(catalog)).await.expect("catalog cache");
        DialogueRuntime::new(&config, pipeline, store, Arc::new(provider))
    }

    async fn runtime(store: Arc<dyn ConversationStore>) -> DialogueRuntime {
        runtime_with(ClassifierBackend::External(Arc::new(Keywords)), store).await
    }

    #[tokio::test]
    async fn complete_request_goes_straight_to_confirmation() {
        let store = Arc::new(InMemoryConversationStore::default());
        let runtime = runtime(store.clone()).await;

        let decision = runtime.process_turn("t1", "book a flight to Paris").await.expect("turn");

        assert_eq!(decision.node, DialogueNode::Confirming { intent: "book_flight".to_string() });
        assert_eq!(decision.state.version, 1);
        assert_eq!(decision.state.slots.get("destination").map(String::as_str), Some("Paris"));
        assert_eq!(decision.messages, vec!["Fly to Paris?".to_string()]);

        let stored = store.load(&ThreadId::from("t1")).await.expect("load");
        assert_eq!(stored, decision.state);
    }

    #[tokio::test]
    async fn slot_filling_then_confirmation_then_execution() {
        let store = Arc::new(InMemoryConversationStore::default());
        let runtime = runtime(store).await;

        let asked = runtime.process_turn("t1", "I want a flight").await.expect("turn 1");
        assert!(matches!(
            asked.action,
            DialogueAction::AskForSlot { ref slot, .. } if slot == "destination"
        ));
        assert_eq!(asked.messages, vec!["Where would you like to go?".to_string()]);

        let confirm = runtime.process_turn("t1", "London").await.expect("turn 2");
        assert_eq!(confirm.node, DialogueNode::Confirming { intent: "book_flight".to_string() });
        assert_eq!(confirm.messages, vec!["Fly to London?".to_string()]);

        let done = runtime.process_turn("t1", "yes").await.expect("turn 3");
        assert_eq!(done.node, DialogueNode::Executing { intent: "book_flight".to_string() });
        assert_eq!(
            done.messages,
            vec!["Booked your flight to London.".to_string(), "Have a nice trip!".to_string()]
        );
        assert_eq!(done.state.node, DialogueNode::AwaitingIntent);
        assert!(done.state.slots.is_empty());
        assert_eq!(done.state.version, 3);
    }

    #[tokio::test]
    async fn direct_trigger_executes_without_classification() {
        let runtime = runtime_with(
            ClassifierBackend::External(Arc::new(Down)),
            Arc::new(InMemoryConversationStore::default()),
        )
        .await;

        let decision = runtime.process_turn("t1", "/greet").await.expect("turn");
        assert_eq!(decision.node, DialogueNode::Executing { intent: "greet".to_string() });
        assert_eq!(decision.messages, vec!["Hello!".to_string()]);
        assert_eq!(runtime.nlu_failure_count(), 0);
    }

    #[tokio::test]
    async fn failing_backends_degrade_to_fallback() {
        let runtime = runtime_with(
            ClassifierBackend::External(Arc::new(Down)),
            Arc::new(InMemoryConversationStore::default()),
        )
        .await;

        let decision = runtime.process_turn("t1", "book a flight").await.expect("turn");
        assert_eq!(decision.node, DialogueNode::Fallback);
        assert_eq!(decision.action, DialogueAction::CannotUnderstand);
        assert_eq!(decision.messages, vec![AppConfig::default().dialogue.fallback_message]);
        assert_eq!(runtime.nlu_failure_count(), 1);
    }

    #[tokio::test]
    async fn version_conflict_is_retried_with_a_fresh_state() {
        let store = Arc::new(Contended {
            inner: InMemoryConversationStore::default(),
            conflicts: AtomicU32::new(1),
        });
        let runtime = runtime(store.clone()).await;

        let decision = runtime.process_turn("t1", "hello").await.expect("retried");
        assert_eq!(decision.state.version, 1);
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persistent_conflict_is_reported_after_bounded_retries() {
        let store = Arc::new(Contended {
            inner: InMemoryConversationStore::default(),
            conflicts: AtomicU32::new(u32::MAX),
        });
        let runtime = runtime(store).await;

        let error = runtime.process_turn("t1", "hello").await.expect_err("conflict");
        assert_eq!(
            error,
            ApplicationError::VersionConflict { thread_id: "t1".to_string(), attempts: 3 }
        );
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_thread_are_serialized() {
        let store = Arc::new(InMemoryConversationStore::default());
        let runtime = Arc::new(runtime(store.clone()).await);

        let tasks = (0..8)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move { runtime.process_turn("shared", "hello").await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.expect("join").expect("turn");
        }

        let state = store.load(&ThreadId::from("shared")).await.expect("load");
        assert_eq!(state.version, 8);
        assert!(runtime.thread_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dialogue_transitions_are_audited() {
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(Arc::new(InMemoryConversationStore::default()))
            .await
            .with_audit_sink(Arc::new(sink.clone()));

        runtime.process_turn("t1", "hello").await.expect("turn");
        let events = sink.events();
        assert!(!events.is_empty());
        assert!(events.iter().all(|event| event.thread_id.as_deref() == Some("t1")));
    }

    #[tokio::test]
    async fn conflicting_attempts_are_not_audited() {
        let sink = InMemoryAuditSink::default();
        let store = Arc::new(Contended {
            inner: InMemoryConversationStore::default(),
            conflicts: AtomicU32::new(1),
        });
        let runtime = runtime(store).await.with_audit_sink(Arc::new(sink.clone()));

        let decision = runtime.process_turn("t1", "hello").await.expect("retried");

        let applied = sink
            .events()
            .into_iter()
            .filter(|event| event.event_type == "dialogue.transition_applied")
            .collect::<Vec<_>>();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            applied[0].metadata.get("version").map(String::as_str),
            Some(decision.state.version.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn api_triggered_intent_renders_the_call_result() {
        let shop = Arc::new(Shop::answering(Ok(json!({"status": "shipped"}))));
        let runtime = runtime(Arc::new(InMemoryConversationStore::default()))
            .await
            .with_action_client(shop.clone());

        let decision = runtime.process_turn("t1", "where is my order").await.expect("turn");

        assert_eq!(decision.node, DialogueNode::Executing { intent: "order_status".to_string() });
        assert_eq!(decision.messages, vec!["Your order is shipped.".to_string()]);
        let requests = shop.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://shop.example/guest/order_status");
        assert_eq!(requests[0].method, HttpMethod::Get);
    }

    #[tokio::test]
    async fn failed_api_call_answers_with_the_failure_message() {
        let store = Arc::new(InMemoryConversationStore::default());
        let runtime = runtime(store.clone())
            .await
            .with_action_client(Arc::new(Shop::answering(Err("connection refused".to_string()))));

        let decision = runtime.process_turn("t1", "where is my order").await.expect("turn");

        assert_eq!(decision.messages, vec![AppConfig::default().dialogue.api_failure_message]);
        let stored = store.load(&ThreadId::from("t1")).await.expect("load");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn slow_api_call_is_cut_off_at_the_api_timeout() {
        let shop = Shop { delay: Duration::from_secs(3600), ..Shop::answering(Ok(json!({}))) };
        let runtime = runtime(Arc::new(InMemoryConversationStore::default()))
            .await
            .with_action_client(Arc::new(shop))
            .with_api_timeout(Duration::from_millis(50));

        let decision = tokio::time::timeout(
            Duration::from_secs(2),
            runtime.process_turn("t1", "where is my order"),
        )
        .await
        .expect("turn must not wait for the slow api")
        .expect("turn");

        assert_eq!(decision.messages, vec![AppConfig::default().dialogue.api_failure_message]);
    }

    #[tokio::test]
    async fn malformed_bytes_degrade_to_fallback() {
        let runtime = runtime(Arc::new(InMemoryConversationStore::default())).await;

        let decision =
            runtime.process_raw_turn("t1", &[0x66, 0x6c, 0xff, 0xfe]).await.expect("turn");
        assert_eq!(decision.node, DialogueNode::Fallback);
        assert_eq!(decision.messages, vec![AppConfig::default().dialogue.fallback_message]);

        let decision = runtime.process_raw_turn("t1", b"hello").await.expect("turn");
        assert_eq!(decision.messages, vec!["Hello!".to_string()]);
        assert_eq!(decision.state.version, 2);
    }
}
