//! Edge-first attention and escalation engine for a desktop companion.
//!
//! Raw observations of what the user is doing stream in from a capture
//! collaborator. A fast local knowledge gate short-circuits recognized
//! contexts, a bounded deduplicating buffer absorbs the rest, and periodic
//! thinking cycles score buffered observations so only the novel and
//! significant ones reach the expensive external analyzer. A cooperating
//! state machine decides when results are spoken and when they are quietly
//! saved for later.

pub mod config;
pub mod engine;
pub mod fog;
pub mod gate;
pub mod models;
pub mod sensing;
pub mod store;

pub use config::EngineConfig;
pub use engine::{
    CycleResult, Disposition, IdleDetector, ObservationBuffer, ObserveOutcome,
    SignificanceScorer, ThinkingEngine,
};
pub use fog::{Episode, EpisodeKind, FogLayer, PromotedPattern};
pub use gate::{CuratedEntry, GateDecision, GateResult, KnowledgeGate};
pub use models::{
    context_hash, EngineStats, Notification, Observation, SavedThought, StatusSnapshot,
    ThinkingState,
};
pub use sensing::{
    Analysis, AnalysisRequest, Analyzer, CaptureSource, EngineController, Snapshot,
};
pub use store::KnowledgeStore;
