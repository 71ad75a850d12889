pub mod conversation;
pub mod decision;
pub mod intent;
pub mod nlu;
pub mod utterance;
