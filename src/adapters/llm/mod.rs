//! LLM-backed classifier/generator collaborators and their mocks.

mod anthropic;
mod mock;

pub use anthropic::{AnthropicConfig, AnthropicDialogue};
pub use mock::{MockClassifier, MockGenerator};
