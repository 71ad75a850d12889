pub mod engine;
pub mod lexicon;
pub mod states;

pub use engine::{assign_slot_values, DialogueEngine, DialoguePolicy, DialogueTransitionError};
pub use lexicon::{classify_reply, Reply};
pub use states::{DialogueNode, DialogueSignal, TransitionOutcome};
