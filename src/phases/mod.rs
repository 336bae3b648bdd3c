//! Trial phase machinery
//!
//! [`Phase`] names the steps of a trial, [`PhaseEngine`] walks them against
//! the rig, and [`resolve_outcome`] turns the recorded licks into a result.

mod control;
mod engine;
mod licks;
mod outcome;
mod phase;

pub use control::SessionControl;
pub use engine::{EngineConfig, PhaseEngine};
pub use licks::{LickBuffer, LickEvent};
pub use outcome::{OutcomeInputs, check_strict_reward, resolve_outcome};
pub use phase::Phase;
