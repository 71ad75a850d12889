//! Intent/entity configuration snapshot.
//!
//! A catalog is immutable once built. Reloads build a new catalog and swap
//! the shared `Arc`, so in-flight requests keep the snapshot they started with.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::intent::{EntityDefinition, IntentDefinition};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog entry with an empty name")]
    EmptyName,
    #[error("intent `{0}` is declared more than once")]
    DuplicateIntent(String),
    #[error("entity `{0}` is declared more than once")]
    DuplicateEntity(String),
    #[error("intent `{intent}` declares slot `{slot}` more than once")]
    DuplicateSlot { intent: String, slot: String },
    #[error("intent `{intent}` slot `{slot}` references unknown entity type `{entity_type}`")]
    UnknownEntityType { intent: String, slot: String, entity_type: String },
    #[error("could not read catalog file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse catalog file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("catalog source failure: {0}")]
    Source(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntentCatalog {
    intents: Vec<IntentDefinition>,
    entities: Vec<EntityDefinition>,
    generation: u64,
}

impl IntentCatalog {
    /// Validates and builds a snapshot. Built-in entity types referenced by a
    /// slot but not declared are added implicitly.
    pub fn new(
        intents: Vec<IntentDefinition>,
        mut entities: Vec<EntityDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut entity_names = BTreeSet::new();
        for entity in &entities {
            if entity.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if !entity_names.insert(entity.name.clone()) {
                return Err(CatalogError::DuplicateEntity(entity.name.clone()));
            }
        }

        let mut intent_names = BTreeSet::new();
        for intent in &intents {
            if intent.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if !intent_names.insert(intent.name.clone()) {
                return Err(CatalogError::DuplicateIntent(intent.name.clone()));
            }

            let mut slot_names = BTreeSet::new();
            for slot in &intent.slots {
                if !slot_names.insert(slot.name.as_str()) {
                    return Err(CatalogError::DuplicateSlot {
                        intent: intent.name.clone(),
                        slot: slot.name.clone(),
                    });
                }
                if entity_names.contains(&slot.entity_type) {
                    continue;
                }
                match EntityDefinition::builtin(&slot.entity_type) {
                    Some(builtin) => {
                        entity_names.insert(builtin.name.clone());
                        entities.push(builtin);
                    }
                    None => {
                        return Err(CatalogError::UnknownEntityType {
                            intent: intent.name.clone(),
                            slot: slot.name.clone(),
                            entity_type: slot.entity_type.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { intents, entities, generation: 0 })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn intents(&self) -> &[IntentDefinition] {
        &self.intents
    }

    pub fn entities(&self) -> &[EntityDefinition] {
        &self.entities
    }

    pub fn intent(&self, name: &str) -> Option<&IntentDefinition> {
        self.intents.iter().find(|intent| intent.name == name)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Position of the intent in the configuration; used to break score ties.
    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.intents.iter().position(|intent| intent.name == name)
    }

    pub fn intent_names(&self) -> Vec<&str> {
        self.intents.iter().map(|intent| intent.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

/// Pull-based access to the admin store's active intent set.
#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn get_active_intents(&self) -> Result<IntentCatalog, CatalogError>;
}

#[derive(Clone, Debug)]
pub struct StaticIntentSource {
    catalog: IntentCatalog,
}

impl StaticIntentSource {
    pub fn new(catalog: IntentCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl IntentSource for StaticIntentSource {
    async fn get_active_intents(&self) -> Result<IntentCatalog, CatalogError> {
        Ok(self.catalog.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    intents: Vec<IntentDefinition>,
    #[serde(default)]
    entities: Vec<EntityDefinition>,
}

/// Reads `[[intents]]` / `[[entities]]` tables from a TOML file.
#[derive(Clone, Debug)]
pub struct TomlIntentSource {
    path: PathBuf,
}

impl TomlIntentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse(raw: &str, path: &Path) -> Result<IntentCatalog, CatalogError> {
        let file = toml::from_str::<CatalogFile>(raw)
            .map_err(|source| CatalogError::ParseFile { path: path.to_path_buf(), source })?;
        IntentCatalog::new(file.intents, file.entities)
    }
}

#[async_trait]
impl IntentSource for TomlIntentSource {
    async fn get_active_intents(&self) -> Result<IntentCatalog, CatalogError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|source| CatalogError::ReadFile { path: self.path.clone(), source })?;
        Self::parse(&raw, &self.path)
    }
}

/// Holder of the current snapshot. Readers clone the `Arc`; writers replace it.
#[derive(Debug, Default)]
pub struct CatalogHandle {
    current: RwLock<Arc<IntentCatalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: IntentCatalog) -> Self {
        let handle = Self::default();
        handle.swap(catalog);
        handle
    }

    pub fn snapshot(&self) -> Arc<IntentCatalog> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Installs `catalog` as the next generation and returns that generation.
    pub fn swap(&self, mut catalog: IntentCatalog) -> u64 {
        let mut current = match self.current.write() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        };
        catalog.generation = current.generation + 1;
        let generation = catalog.generation;
        *current = Arc::new(catalog);
        generation
    }
}

/// Caches the source's catalog for the process lifetime; reloads only after
/// an explicit [`CatalogCache::invalidate`] or [`CatalogCache::refresh`].
pub struct CatalogCache<S> {
    source: S,
    handle: CatalogHandle,
    stale: AtomicBool,
}

impl<S> CatalogCache<S>
where
    S: IntentSource,
{
    /// Performs the initial pull. Failure here is an initialization failure.
    pub async fn load(source: S) -> Result<Self, CatalogError> {
        let catalog = source.get_active_intents().await?;
        Ok(Self { source, handle: CatalogHandle::new(catalog), stale: AtomicBool::new(false) })
    }

    pub fn snapshot(&self) -> Arc<IntentCatalog> {
        self.handle.snapshot()
    }

    pub fn invalidate(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub async fn refresh(&self) -> Result<u64, CatalogError> {
        let catalog = self.source.get_active_intents().await?;
        Ok(self.handle.swap(catalog))
    }

    /// Current snapshot, reloading first when invalidated. On reload failure
    /// the cache stays stale and the previous snapshot remains installed.
    pub async fn current(&self) -> Result<Arc<IntentCatalog>, CatalogError> {
        if self.stale.swap(false, Ordering::AcqRel) {
            if let Err(error) = self.refresh().await {
                self.stale.store(true, Ordering::Release);
                return Err(error);
            }
        }
        Ok(self.snapshot())
    }
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    fn snapshot(&self) -> Arc<IntentCatalog>;
    async fn current(&self) -> Result<Arc<IntentCatalog>, CatalogError>;
    fn invalidate(&self);
    async fn refresh(&self) -> Result<u64, CatalogError>;
}

#[async_trait]
impl<S> CatalogProvider for CatalogCache<S>
where
    S: IntentSource,
{
    fn snapshot(&self) -> Arc<IntentCatalog> {
        CatalogCache::snapshot(self)
    }

    async fn current(&self) -> Result<Arc<IntentCatalog>, CatalogError> {
        CatalogCache::current(self).await
    }

    fn invalidate(&self) {
        CatalogCache::invalidate(self)
    }

    async fn refresh(&self) -> Result<u64, CatalogError> {
        CatalogCache::refresh(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::{
        CatalogCache, CatalogError, CatalogHandle, IntentCatalog, IntentSource, TomlIntentSource,
    };
    use crate::domain::intent::{EntityDefinition, EntityKind, IntentDefinition, SlotDefinition};

    const CATALOG_TOML: &str = r#"
[[entities]]
name = "city"
synonyms = { "Paris" = ["paris", "city of light"] }
ner_labels = ["GPE"]

[[intents]]
name = "book_flight"
examples = ["book a flight", "I need a plane ticket"]
confirmation_template = "Book a flight to {{ slots.destination }}?"

[[intents.slots]]
name = "destination"
entity_type = "city"
prompt = "Where would you like to fly?"

[[intents.slots]]
name = "passengers"
entity_type = "number"
required = false

[[intents]]
name = "greet"
requires_confirmation = false
response_template = "Hello!###How can I help?"
"#;

    #[test]
    fn toml_catalog_parses_and_adds_builtin_entities() {
        let catalog =
            TomlIntentSource::parse(CATALOG_TOML, Path::new("catalog.toml")).expect("parse");

        assert_eq!(catalog.intent_names(), vec!["book_flight", "greet"]);
        assert_eq!(catalog.declaration_index("greet"), Some(1));
        assert!(catalog.entity("city").is_some());
        assert_eq!(catalog.entity("number").map(|e| e.kind), Some(EntityKind::Number));

        let book_flight = catalog.intent("book_flight").expect("intent");
        assert!(book_flight.requires_confirmation);
        assert!(book_flight.slots[0].required);
        assert!(!book_flight.slots[1].required);
        assert!(!catalog.intent("greet").expect("greet").requires_confirmation);
    }

    #[test]
    fn unknown_entity_type_is_rejected() {
        let error = IntentCatalog::new(
            vec![IntentDefinition::new("book_flight")
                .with_slot(SlotDefinition::required("destination", "airport", "Where?"))],
            Vec::new(),
        )
        .expect_err("unknown type");

        assert!(matches!(error, CatalogError::UnknownEntityType { ref entity_type, .. } if entity_type == "airport"));
    }

    #[test]
    fn duplicate_intents_are_rejected() {
        let error = IntentCatalog::new(
            vec![IntentDefinition::new("greet"), IntentDefinition::new("greet")],
            vec![EntityDefinition::new("city", EntityKind::Text)],
        )
        .expect_err("duplicate");
        assert!(matches!(error, CatalogError::DuplicateIntent(ref name) if name == "greet"));
    }

    #[test]
    fn swap_installs_new_generation_without_touching_old_snapshot() {
        let handle = CatalogHandle::new(
            IntentCatalog::new(vec![IntentDefinition::new("greet")], Vec::new()).expect("catalog"),
        );
        let before = handle.snapshot();
        assert_eq!(before.generation(), 1);

        let generation = handle.swap(
            IntentCatalog::new(vec![IntentDefinition::new("goodbye")], Vec::new())
                .expect("catalog"),
        );

        assert_eq!(generation, 2);
        assert_eq!(before.intent_names(), vec!["greet"]);
        assert_eq!(handle.snapshot().intent_names(), vec!["goodbye"]);
    }

    struct CountingSource {
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IntentSource for CountingSource {
        async fn get_active_intents(&self) -> Result<IntentCatalog, CatalogError> {
            let pull = self.pulls.fetch_add(1, Ordering::SeqCst);
            IntentCatalog::new(vec![IntentDefinition::new(format!("intent_{pull}"))], Vec::new())
        }
    }

    #[tokio::test]
    async fn cache_pulls_once_until_invalidated() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let cache =
            CatalogCache::load(CountingSource { pulls: Arc::clone(&pulls) }).await.expect("load");

        for _ in 0..3 {
            let catalog = cache.current().await.expect("current");
            assert_eq!(catalog.intent_names(), vec!["intent_0"]);
        }
        assert_eq!(pulls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        let reloaded = cache.current().await.expect("reloaded");
        assert_eq!(reloaded.intent_names(), vec!["intent_1"]);
        assert_eq!(reloaded.generation(), 2);
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn toml_source_reads_catalog_from_disk() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("catalog.toml");
        fs::write(&path, CATALOG_TOML).expect("write catalog");

        let catalog = TomlIntentSource::new(&path).get_active_intents().await.expect("load");
        assert_eq!(catalog.intents().len(), 2);

        let missing = TomlIntentSource::new(dir.path().join("missing.toml"))
            .get_active_intents()
            .await
            .expect_err("missing file");
        assert!(matches!(missing, CatalogError::ReadFile { .. }));
    }
}
