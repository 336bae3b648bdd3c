//! Trial handler
//!
//! Owns the trial list, the level state and the anti-bias controller. The
//! phase engine calls [`TrialHandler::next_trial`] at INTRO entry and
//! [`TrialHandler::end_trial`] at END; everything in between reads the
//! current trial through accessors.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{info, warn};

use super::bias::{BiasController, BiasParams, SideContext};
use super::history::HistoryWindow;
use super::level::LevelState;
use super::train::{StimulusTrain, TrainParams, generate_train};
use super::types::{Outcome, Side, Trial};
use crate::clock::Clock;
use crate::constants::INVALID_STREAK_ALERT;
use crate::error::{RigError, RigResult};
use crate::events::{EventRecord, LoggerHandle};
use crate::settings::{Manipulation, ManipulationSpec, Rule, TrialParams};

/// Construction parameters for a [`TrialHandler`].
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub params: TrialParams,
    pub condition: Option<String>,
    /// Used by levels that leave the manipulation open
    pub session_manipulation: ManipulationSpec,
    /// None = seeded from entropy
    pub seed: Option<u64>,
}

pub struct TrialHandler {
    rng: StdRng,
    params: TrialParams,
    train_params: TrainParams,
    condition: Option<String>,
    session_manipulation: ManipulationSpec,
    force_manipulation: Option<Manipulation>,
    levels: LevelState,
    bias: BiasController,
    trials: Vec<Trial>,
    train: Option<StimulusTrain>,
    history: HistoryWindow,
    nudge: Option<Side>,
    invalid_alert_sent: bool,
    logger: LoggerHandle,
    clock: Arc<dyn Clock>,
}

impl TrialHandler {
    pub fn new(config: HandlerConfig, levels: LevelState, logger: LoggerHandle, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let train_params = TrainParams {
            rate_sum: config.params.rate_sum,
            min_isi: config.params.min_isi,
            pad: config.params.stim_phase_pad,
        };
        Self {
            rng,
            bias: BiasController::new(BiasParams::from(&config.params)),
            params: config.params,
            train_params,
            condition: config.condition,
            session_manipulation: config.session_manipulation,
            force_manipulation: None,
            levels,
            trials: Vec::new(),
            train: None,
            history: HistoryWindow::new(),
            nudge: None,
            invalid_alert_sent: false,
            logger,
            clock,
        }
    }

    // =========================================================================
    // TRIAL LIFECYCLE
    // =========================================================================

    /// Choose every parameter of the next trial, generate its stimulus train
    /// and write the timeline to the `trials_timing` log.
    pub fn next_trial(&mut self) -> RigResult<&Trial> {
        if self.trials.last().is_some_and(|t| t.outcome.is_none()) {
            return Err(RigError::Precondition("next_trial called before end_trial".into()));
        }
        self.check_invalid_streak();

        let idx = self.trials.len();
        let level = self.levels.current();
        let ctx = SideContext {
            idx,
            alternate: level.alternate
                || (self.levels.in_intro() && self.params.alternate_training_levels && level.is_training),
            in_intro: self.levels.in_intro(),
        };
        let choice = self.bias.next_side(&mut self.rng, &self.trials, ctx);
        let side = choice.side;

        self.levels.update(&self.trials);
        let level = self.levels.current();

        let ratio = level.ratio.sample(&mut self.rng)?;
        let rule = level.rule;
        let stereo = level.stereo;
        let manipulation = match self.force_manipulation {
            Some(m) => m,
            None => level
                .manipulation
                .as_ref()
                .unwrap_or(&self.session_manipulation)
                .sample(&mut self.rng)?,
        };
        let dur = level
            .stim_phase_dur
            .as_ref()
            .unwrap_or(&self.params.stim_phase_duration)
            .sample(&mut self.rng)?;
        let delay = level
            .delay_phase_dur
            .as_ref()
            .unwrap_or(&self.params.delay_phase_duration)
            .sample(&mut self.rng)?;
        let nudge_enabled = level.nudge_enabled;
        let reward_scale = self.bias.reward_scale(&mut self.rng, side);
        self.nudge = self.bias.check_nudge(nudge_enabled);

        let train = generate_train(&mut self.rng, side, ratio, dur, stereo, &self.train_params)?;
        for ev in &train.events {
            self.logger.write(EventRecord::Stimulus {
                trial: idx,
                side: ev.side,
                time: ev.time,
            });
        }
        let [n_left_intended, n_right_intended] = train.counts();

        self.trials.push(Trial {
            idx,
            start: self.clock.now(),
            dur,
            ratio: train.ratio(),
            n_left_intended,
            n_right_intended,
            side,
            condition: self.condition.clone(),
            manipulation,
            delay,
            rule,
            level: self.levels.level(),
            reward_scale,
            draw_p: choice.draw_p,
            outcome: None,
            reward: false,
            end: None,
            n_left: None,
            n_right: None,
        });
        self.train = Some(train);
        self.current()
    }

    /// Finalize the current trial, update performance history and log it.
    pub fn end_trial(&mut self, outcome: Outcome, reward: bool, observed: [usize; 2]) -> RigResult<&Trial> {
        let now = self.clock.now();
        let trial = self
            .trials
            .last_mut()
            .filter(|t| t.outcome.is_none())
            .ok_or_else(|| RigError::Precondition("end_trial without an open trial".into()))?;
        trial.end = Some(now);
        trial.outcome = Some(outcome);
        trial.reward = reward;
        trial.n_left = Some(observed[0]);
        trial.n_right = Some(observed[1]);
        self.logger.write(EventRecord::Trial(trial.clone()));

        info!(
            "Trial {} ended: side={} outcome={} reward={} level={}",
            trial.idx,
            trial.side,
            outcome.name(),
            reward,
            trial.level
        );
        self.history.update(&self.trials);
        self.current()
    }

    /// Warn once per session when the recent outcomes were all invalid.
    fn check_invalid_streak(&mut self) {
        if self.invalid_alert_sent || self.trials.len() < INVALID_STREAK_ALERT {
            return;
        }
        let recent = &self.trials[self.trials.len() - INVALID_STREAK_ALERT..];
        if recent.iter().all(|t| !t.is_valid()) {
            warn!("{} outcomes have been invalid. Check on rig.", INVALID_STREAK_ALERT);
            self.invalid_alert_sent = true;
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    fn current(&self) -> RigResult<&Trial> {
        self.trials
            .last()
            .ok_or_else(|| RigError::Precondition("no trial has been generated".into()))
    }

    pub fn trial(&self) -> Option<&Trial> {
        self.trials.last()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn train(&self) -> Option<&StimulusTrain> {
        self.train.as_ref()
    }

    /// Flags of the current trial's rule.
    pub fn rule(&self) -> Option<Rule> {
        self.trial().map(|t| t.rule.rule())
    }

    /// STIM phase length: train duration plus lead and tail padding.
    pub fn phase_dur(&self) -> Option<f64> {
        let (lead, tail) = self.params.stim_phase_pad;
        self.trial().map(|t| t.dur + lead + tail)
    }

    pub fn delay(&self) -> Option<f64> {
        self.trial().map(|t| t.delay)
    }

    pub fn reward_scale(&self) -> f64 {
        self.trial().map(|t| t.reward_scale).unwrap_or(1.0)
    }

    pub fn manipulation(&self) -> Manipulation {
        self.trial().map(|t| t.manipulation).unwrap_or_default()
    }

    /// Manipulator nudge requested for the current trial.
    pub fn nudge(&self) -> Option<Side> {
        self.nudge
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    pub fn biases(&self) -> Option<[f64; 2]> {
        self.bias.biases()
    }

    pub fn invalid_alert_sent(&self) -> bool {
        self.invalid_alert_sent
    }

    // =========================================================================
    // MANUAL CONTROL
    // =========================================================================

    pub fn levels(&self) -> &LevelState {
        &self.levels
    }

    pub fn level(&self) -> usize {
        self.levels.level()
    }

    pub fn change_level(&mut self, inc: i64) {
        self.levels.change_level(inc);
    }

    pub fn set_level_locked(&mut self, locked: bool) {
        self.levels.set_locked(locked);
    }

    /// Override the manipulation of every following trial (None = level/session).
    pub fn force_manipulation(&mut self, manipulation: Option<Manipulation>) {
        self.force_manipulation = manipulation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{EventLogger, MemoryStore, RecordKind, memory_logger};
    use crate::settings::{LevelTable, RuleId};
    use std::collections::BTreeMap;

    struct Fixture {
        handler: TrialHandler,
        logger: EventLogger,
        store: MemoryStore,
        clock: ManualClock,
        _dir: tempfile::TempDir,
    }

    fn fixture(start_level: Option<usize>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let logger = memory_logger(&store, dir.path(), Arc::clone(&shared));
        let config = HandlerConfig {
            params: TrialParams::default(),
            condition: Some("test".into()),
            session_manipulation: ManipulationSpec::default(),
            seed: Some(11),
        };
        let levels = LevelState::new(LevelTable::standard(), start_level, Vec::new());
        let handler = TrialHandler::new(config, levels, logger.handle(), shared);
        Fixture {
            handler,
            logger,
            store,
            clock,
            _dir: dir,
        }
    }

    #[test]
    fn test_trial_written_once_at_end() {
        let mut f = fixture(None);
        let trial = f.handler.next_trial().unwrap().clone();
        assert_eq!(trial.idx, 0);
        assert_eq!(trial.rule, RuleId::Passive);
        assert!(trial.outcome.is_none());
        let n_events = f.handler.train().unwrap().events.len();

        f.clock.advance(4.0);
        f.handler.end_trial(Outcome::Correct, true, [1, 2]).unwrap();
        f.logger.end(BTreeMap::new()).unwrap();

        let stored = f.store.trials();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].outcome, Some(Outcome::Correct));
        assert_eq!(stored[0].n_right, Some(2));
        assert_eq!(stored[0].end, Some(4.0));
        assert_eq!(f.store.rows(RecordKind::TrialsTiming).len(), n_events);
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let mut f = fixture(None);
        assert!(f.handler.end_trial(Outcome::Null, false, [0, 0]).is_err());
        f.handler.next_trial().unwrap();
        assert!(f.handler.next_trial().is_err());
        f.handler.end_trial(Outcome::Null, false, [0, 0]).unwrap();
        assert!(f.handler.end_trial(Outcome::Null, false, [0, 0]).is_err());
    }

    #[test]
    fn test_free_rewards_alternate_then_advance() {
        let mut f = fixture(None);
        for i in 0..15 {
            let t = f.handler.next_trial().unwrap();
            assert_eq!(t.level, 0);
            assert_eq!(t.side, Side::by_parity(i));
            f.handler.end_trial(Outcome::Correct, true, [0, 0]).unwrap();
        }
        let t = f.handler.next_trial().unwrap();
        assert_eq!(t.level, 1);
        assert_eq!(t.rule, RuleId::Fault);
    }

    #[test]
    fn test_ratio_and_phase_duration() {
        let mut f = fixture(Some(7));
        for _ in 0..40 {
            let t = f.handler.next_trial().unwrap().clone();
            let candidates = [8.0, 4.0, 2.5, 1.5];
            assert!(
                candidates
                    .iter()
                    .any(|r| (t.ratio - r).abs() < 1e-9 || (t.ratio - 1.0 / r).abs() < 1e-9),
                "ratio {}",
                t.ratio
            );
            assert!((f.handler.phase_dur().unwrap() - (t.dur + 0.05)).abs() < 1e-12);
            f.handler.end_trial(Outcome::Incorrect, false, [0, 0]).unwrap();
        }
    }

    #[test]
    fn test_intro_training_levels_alternate() {
        // Level 4 starts on its intro at level 2, a training level
        let mut f = fixture(Some(4));
        for i in 0..8 {
            let t = f.handler.next_trial().unwrap();
            assert_eq!(t.level, 2);
            assert_eq!(t.side, Side::by_parity(i));
            f.handler.end_trial(Outcome::Correct, true, [0, 0]).unwrap();
        }
    }

    #[test]
    fn test_forced_manipulation() {
        let mut f = fixture(None);
        f.handler.force_manipulation(Some(Manipulation::OptoLick));
        assert_eq!(f.handler.next_trial().unwrap().manipulation, Manipulation::OptoLick);
        f.handler.end_trial(Outcome::Null, false, [0, 0]).unwrap();
        f.handler.force_manipulation(None);
        assert_eq!(f.handler.next_trial().unwrap().manipulation, Manipulation::None);
    }

    #[test]
    fn test_invalid_streak_alerts_once() {
        let mut f = fixture(None);
        for _ in 0..6 {
            f.handler.next_trial().unwrap();
            f.handler.end_trial(Outcome::Null, false, [0, 0]).unwrap();
        }
        assert!(!f.handler.invalid_alert_sent());
        f.handler.next_trial().unwrap();
        assert!(f.handler.invalid_alert_sent());
    }

    #[test]
    fn test_manual_level_control() {
        let mut f = fixture(None);
        f.handler.change_level(3);
        assert_eq!(f.handler.level(), 3);
        f.handler.set_level_locked(true);
        f.handler.change_level(-1);
        assert_eq!(f.handler.level(), 3);
        assert_eq!(f.handler.next_trial().unwrap().rule, RuleId::Full);
    }
}
