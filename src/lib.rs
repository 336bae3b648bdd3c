//! Trialrig - closed-loop behavioral trial control for a two-port training rig
//!
//! This crate provides trial generation, the phase state machine, the event
//! logging pipeline and the session runner, organized into modules.

// Core modules
pub mod clock;
pub mod constants;
pub mod error;
pub mod logging;
pub mod settings;

// Trial control modules
pub mod events;
pub mod hardware;
pub mod phases;
pub mod session;
pub mod trials;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HardwareError, RigError, RigResult};
pub use events::{
    EventLogger, EventRecord, LoggerHandle, MemoryStore, RecordKind, RecordStore, SqliteStore,
    SyncGate,
};
pub use hardware::{Hardware, Position, SensorPoller, SimulatedRig, SubjectModel};
pub use phases::{EngineConfig, Phase, PhaseEngine, SessionControl};
pub use session::{Session, SessionSummary};
pub use settings::{EngineSettings, Level, LevelTable, RigConfig, Rule, RuleId, TrialParams};
pub use trials::{Outcome, Side, StimulusEvent, Trial, TrialHandler};
