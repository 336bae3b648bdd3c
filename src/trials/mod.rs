//! Trial generation engine
//!
//! Everything decided before a trial runs: side, evidence ratio, rule,
//! manipulation, durations and the stimulus timeline, plus the adaptive
//! level and anti-bias state updated after it ends.

mod bias;
mod handler;
mod history;
mod level;
mod train;
mod types;

pub use bias::{BiasController, BiasParams, SideChoice, SideContext};
pub use handler::{HandlerConfig, TrialHandler};
pub use history::{HistoryWindow, PerformanceSnapshot, summarize};
pub use level::LevelState;
pub use train::{StimulusTrain, TrainParams, generate_train, split_rates};
pub use types::{Outcome, Side, StimulusEvent, Trial};

#[cfg(test)]
pub(crate) use types::finished_trial;
