pub mod audit;
pub mod catalog;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod errors;

pub use catalog::{
    CatalogCache, CatalogError, CatalogHandle, CatalogProvider, IntentCatalog, IntentSource,
    StaticIntentSource, TomlIntentSource,
};
pub use dialogue::{DialogueEngine, DialogueNode, DialoguePolicy, DialogueSignal};
pub use domain::conversation::{ConversationState, Turn};
pub use domain::decision::{DialogueAction, DialogueDecision};
pub use domain::intent::{
    ApiDetails, EntityDefinition, EntityKind, HttpMethod, IntentDefinition, SlotDefinition,
};
pub use domain::nlu::{Entity, ExtractorSource, IntentMatch, IntentScore, NluResult, Span};
pub use domain::utterance::{ChannelMetadata, ThreadId, Utterance};
pub use errors::{ApplicationError, DomainError, InterfaceError};
