//! Application layer: the session registry and the turn orchestrator.

mod fastpath;
mod registry;
mod turn;

pub use fastpath::classify_fast;
pub use registry::{SessionEntry, SessionMetrics, SessionRegistry, SessionSlot};
pub use turn::{
    EngineError, OrchestratorSettings, PersistenceFailure, SessionClosure, SessionSnapshot,
    TurnOrchestrator, TurnOutcome,
};
