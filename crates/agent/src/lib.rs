//! NLU pipeline and dialogue runtime.
//!
//! One turn flows through:
//! 1. **Featurizer** (`featurizer`) - tokens, lemmas, named-entity spans and
//!    a fixed-width embedding
//! 2. **Intent ensemble** (`classifier`) - statistical, zero-shot LLM and
//!    externally registered backends queried concurrently and merged
//! 3. **Entity extraction** (`extractor`) - featurizer spans, catalog
//!    patterns and synonym gazetteers mapped onto declared entity types
//! 4. **Dialogue decision** - the state machine in `parley-core`
//! 5. **Rendering** (`render`) - slot prompts and intent templates, after
//!    the outbound call of an API-triggered intent (`action`)
//!
//! `DialogueRuntime::process_turn` wires these to the conversation store.
//! The LLM only ever names one of the catalog's intents; its output is
//! parsed defensively and a failing backend is excluded, never fatal.

pub mod action;
pub mod classifier;
pub mod extractor;
pub mod featurizer;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod runtime;

pub use action::{ActionClient, ActionError, ActionRequest, HttpActionClient};
pub use classifier::{BackendError, ClassifierBackend, IntentClassifier, IntentEnsemble};
pub use pipeline::NluPipeline;
pub use render::ResponseRenderer;
pub use runtime::DialogueRuntime;
