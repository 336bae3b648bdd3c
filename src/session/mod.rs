//! Session orchestration
//!
//! A [`Session`] owns one run of the rig: it loads the subject's history,
//! starts the logging pipeline, loops trials through the phase engine and
//! writes a [`SessionSummary`] at the end.

mod runner;
mod snapshot;
mod summary;

pub use runner::{STIM_POSITION, Session, new_session_id};
pub use snapshot::code_snapshot;
pub use summary::SessionSummary;
