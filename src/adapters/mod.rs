//! Adapters: implementations of the collaborator ports.

mod clock;
pub mod llm;
pub mod persistence;

pub use clock::{ManualClock, SystemClock};
pub use llm::{AnthropicConfig, AnthropicDialogue, MockClassifier, MockGenerator};
pub use persistence::InMemoryBookingWriter;
