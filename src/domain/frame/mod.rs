//! Streaming reply splitting: spoken text vs. the trailing structured
//! decision payload.

mod decision;
mod splitter;

pub use decision::DecisionFrame;
pub use splitter::{FrameSplitter, SplitOutcome, CLOSE_SENTINEL, OPEN_SENTINEL};
