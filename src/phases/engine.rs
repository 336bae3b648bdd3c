//! Phase engine
//!
//! Drives one trial at a time through INTRO, STIM, DELAY, LICK, REWARD, ITI
//! and END. The engine ticks cooperatively against a [`Clock`]: each tick
//! polls sensors, samples the session control signals and evaluates the
//! current phase. Hardware effects are fired on phase entry or from the
//! phase body; a failed effect is logged and the trial continues.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::control::SessionControl;
use super::licks::{LickBuffer, LickEvent};
use super::outcome::{OutcomeInputs, check_strict_reward, resolve_outcome};
use super::phase::Phase;
use crate::clock::Clock;
use crate::error::{HardwareError, RigError, RigResult};
use crate::events::{EventRecord, LoggerHandle};
use crate::hardware::{Cue, Hardware, Position, SensorPoller, SensorReading, SyncTag, ValveKind};
use crate::settings::{EngineSettings, Manipulation, Rule};
use crate::trials::{Side, StimulusEvent, Trial, TrialHandler};

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    /// Control loop period (s)
    pub tick_interval: f64,
    /// Seed for hint intervals (None = entropy)
    pub seed: Option<u64>,
}

/// Per-trial runtime state, reset at INTRO.
#[derive(Debug, Clone)]
struct TrialState {
    idx: usize,
    side: Side,
    rule: Rule,
    manipulation: Manipulation,
    reward_scale: f64,
    stim_duration: f64,
    delay: f64,
    stimuli: Vec<StimulusEvent>,
    next_stim: usize,
    delivered: [usize; 2],
    /// Cleared by a wrong-side lick under strict rules
    do_reward: bool,
    /// The reward gate passed in REWARD
    earned: bool,
    /// A reward was actually delivered
    rewarded: bool,
    killed: bool,
    early: Option<Side>,
    wrong_signaled: bool,
    error_signaled: bool,
    last_hint: f64,
    next_hint: f64,
}

impl TrialState {
    fn new(trial: &Trial, stimuli: Vec<StimulusEvent>, stim_duration: f64, hint_mean: f64) -> Self {
        Self {
            idx: trial.idx,
            side: trial.side,
            rule: trial.rule.rule(),
            manipulation: trial.manipulation,
            reward_scale: trial.reward_scale,
            stim_duration,
            delay: trial.delay,
            stimuli,
            next_stim: 0,
            delivered: [0, 0],
            do_reward: true,
            earned: false,
            rewarded: false,
            killed: false,
            early: None,
            wrong_signaled: false,
            error_signaled: false,
            last_hint: 0.0,
            next_hint: hint_mean,
        }
    }
}

pub struct PhaseEngine<H: Hardware> {
    settings: EngineSettings,
    tick_interval: f64,
    hw: H,
    sensors: Option<SensorPoller>,
    logger: LoggerHandle,
    clock: Arc<dyn Clock>,
    control: SessionControl,
    rng: StdRng,
    /// Hint repeat interval
    hint_gap: Normal<f64>,
    phase: Phase,
    phase_start: f64,
    phase_duration: f64,
    /// Trial the current phase belongs to
    phase_trial: usize,
    /// False until the first INTRO has been entered
    started: bool,
    last_tick: f64,
    trial: Option<TrialState>,
    licks: LickBuffer,
    holding: bool,
    moving: bool,
    light: Option<bool>,
    rewards_given: usize,
}

impl<H: Hardware> PhaseEngine<H> {
    pub fn new(
        config: EngineConfig,
        hw: H,
        logger: LoggerHandle,
        clock: Arc<dyn Clock>,
        control: SessionControl,
    ) -> RigResult<Self> {
        let (mean, sd) = config.settings.hint_interval;
        let hint_gap = Normal::new(mean, sd)
            .map_err(|e| RigError::Precondition(format!("hint interval ({}, {}): {}", mean, sd, e)))?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = clock.now();
        Ok(Self {
            settings: config.settings,
            tick_interval: config.tick_interval,
            hw,
            sensors: None,
            logger,
            clock,
            control,
            rng,
            hint_gap,
            phase: Phase::End,
            phase_start: now,
            phase_duration: 0.0,
            phase_trial: 0,
            started: false,
            last_tick: now,
            trial: None,
            licks: LickBuffer::new(),
            holding: false,
            moving: true,
            light: None,
            rewards_given: 0,
        })
    }

    /// Read sensors from a background poller instead of polling the hardware.
    pub fn with_poller(mut self, poller: SensorPoller) -> Self {
        self.sensors = Some(poller);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    pub fn rewards_given(&self) -> usize {
        self.rewards_given
    }

    pub fn licks(&self) -> &LickBuffer {
        &self.licks
    }

    // =========================================================================
    // TRIAL LOOP
    // =========================================================================

    /// Run one full trial. Returns the finalized trial.
    pub fn run_trial(&mut self, handler: &mut TrialHandler) -> RigResult<Trial> {
        self.start_trial(handler)?;
        while self.phase != Phase::End {
            self.clock.sleep(self.tick_interval);
            self.tick(handler)?;
        }
        handler
            .trial()
            .cloned()
            .ok_or_else(|| RigError::Invariant("trial vanished before END".into()))
    }

    /// Generate the next trial and enter its INTRO.
    pub fn start_trial(&mut self, handler: &mut TrialHandler) -> RigResult<()> {
        if self.started && self.phase != Phase::End {
            return Err(RigError::Precondition(format!(
                "trial {} still in {}",
                self.phase_trial, self.phase
            )));
        }
        let trial = handler.next_trial()?.clone();
        let stimuli = handler.train().map(|t| t.events.clone()).unwrap_or_default();
        let stim_duration = handler.phase_dur().unwrap_or(trial.dur);
        let nudge = handler.nudge();

        self.licks.clear();
        self.last_tick = self.clock.now();
        self.trial = Some(TrialState::new(&trial, stimuli, stim_duration, self.settings.hint_interval.0));
        self.to_phase(Phase::Intro, handler)?;

        // Discard anything latched between trials
        let _ = self.read_sensors();

        if let Some(side) = nudge {
            info!("Nudging manipulator toward {}", side);
            self.trigger("manipulator", "nudge", Some(side), 0.0, |hw| hw.manipulator_nudge(side));
        }
        Ok(())
    }

    /// One control-loop step.
    pub fn tick(&mut self, handler: &mut TrialHandler) -> RigResult<()> {
        if self.phase == Phase::End {
            return Ok(());
        }
        let now = self.clock.now();
        let dt = (now - self.last_tick).max(0.0);
        self.last_tick = now;

        self.update_licks(now);

        // Kill overrides any pause, including one held by the hold rule
        if self.control.is_killed() && !matches!(self.phase, Phase::Iti | Phase::End) {
            if self.control.is_paused() {
                info!("Kill while paused, clearing pause");
                self.control.clear_pause();
            }
            if let Some(t) = self.trial.as_mut() {
                t.killed = true;
            }
            return self.to_phase(Phase::Iti, handler);
        }

        if self.control.is_paused() && self.phase.freezes_on_pause() {
            self.phase_start += dt;
            self.set_light(false);
            return Ok(());
        }

        let elapsed = now - self.phase_start;
        let timed_out = elapsed >= self.phase_duration;
        let Some(t) = self.trial.as_ref() else {
            return Err(RigError::Invariant("tick without a trial".into()));
        };
        let (rule, side) = (t.rule, t.side);

        match self.phase {
            Phase::Intro => {
                if timed_out {
                    return self.to_phase(Phase::Stim, handler);
                }
            }
            Phase::Stim => {
                if rule.phase && self.abort_on_early(Phase::Stim) {
                    return self.to_phase(Phase::Iti, handler);
                }
                if self.settings.puffs_on {
                    self.deliver_stimuli(elapsed);
                }
                if timed_out {
                    return self.to_phase(Phase::Delay, handler);
                }
            }
            Phase::Delay => {
                if rule.phase && self.abort_on_early(Phase::Delay) {
                    return self.to_phase(Phase::Iti, handler);
                }
                if timed_out {
                    return self.to_phase(Phase::Lick, handler);
                }
                if rule.hint_delay {
                    self.maybe_hint(now, side);
                }
            }
            Phase::Lick => {
                // Relight after a pause
                if self.settings.go_cue.light() {
                    self.set_light(true);
                }
                if rule.hint_delay {
                    self.maybe_hint(now, side);
                }
                let licked = self.licks.any_in(Phase::Lick);
                let respond = !rule.any
                    || (licked && !rule.fault)
                    || (licked && rule.fault && self.licks.any_side_in(Phase::Lick, side));
                if respond || timed_out {
                    return self.to_phase(Phase::Reward, handler);
                }
            }
            Phase::Reward => return self.reward_tick(now, timed_out, handler),
            Phase::Iti => {
                if rule.phase
                    && self.licks.events().iter().any(|l| matches!(l.phase, Phase::Stim | Phase::Delay))
                    && self.trial.as_ref().is_some_and(|t| !t.error_signaled)
                {
                    self.play(Cue::Error);
                    if let Some(t) = self.trial.as_mut() {
                        t.error_signaled = true;
                    }
                }
                if timed_out {
                    let rewarded = self.trial.as_ref().is_some_and(|t| t.rewarded);
                    if rewarded || !self.settings.motion_control || self.moving || self.control.is_killed() {
                        return self.to_phase(Phase::End, handler);
                    }
                }
            }
            Phase::End => {}
        }
        Ok(())
    }

    fn reward_tick(&mut self, now: f64, timed_out: bool, handler: &mut TrialHandler) -> RigResult<()> {
        let Some(t) = self.trial.as_mut() else {
            return Err(RigError::Invariant("reward phase without a trial".into()));
        };
        let (rule, side) = (t.rule, t.side);
        let wrong = self.licks.any_side_in(Phase::Lick, side.opposite());
        let correct = self.licks.any_side_in(Phase::Lick, side);

        let mut cue_wrong = false;
        if rule.side && wrong && !t.earned && !rule.fault && !t.wrong_signaled {
            t.wrong_signaled = true;
            t.do_reward = false;
            cue_wrong = true;
        }
        let do_reward = t.do_reward;
        if cue_wrong {
            self.play(Cue::Wrong);
        }

        if rule.any && !self.licks.any_in(Phase::Lick) {
            return self.to_phase(Phase::Iti, handler);
        }
        if rule.any && rule.fault && !correct {
            return self.to_phase(Phase::Iti, handler);
        }
        if rule.any && rule.side && do_reward && !correct {
            return Err(RigError::Invariant(format!(
                "reward gate open without a correct-side lick on trial {}",
                self.phase_trial
            )));
        }

        if do_reward && self.trial.as_ref().is_some_and(|t| !t.earned) {
            let reward_side = if self.settings.use_trials {
                side
            } else {
                self.licks.first_in(&[Phase::Lick]).map(|l| l.side).unwrap_or(side)
            };
            self.give_reward(reward_side);
        }

        if rule.hint_reward {
            self.maybe_hint(now, side);
        }
        if timed_out {
            return self.to_phase(Phase::Iti, handler);
        }
        Ok(())
    }

    fn give_reward(&mut self, side: Side) {
        let Some(t) = self.trial.as_mut() else {
            return;
        };
        t.earned = true;
        if !self.settings.rewards_on {
            return;
        }
        let secs = self.settings.reward_valve_duration[side.index()] * t.reward_scale;
        t.rewarded = true;
        self.rewards_given += 1;
        self.trigger(ValveKind::Reward.device(), "open", Some(side), secs, |hw| {
            hw.valve_open(ValveKind::Reward, side, secs)
        });
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    fn check_transition(&self, target: Phase) -> RigResult<()> {
        let from = self.phase;
        let ok = target == from.next()
            || (target == Phase::Iti && from.can_abort())
            || (from == Phase::End && target == Phase::Intro);
        if ok {
            Ok(())
        } else {
            Err(RigError::Invariant(format!("illegal transition {} -> {}", from, target)))
        }
    }

    /// Close the current phase record and enter `target`.
    fn to_phase(&mut self, target: Phase, handler: &mut TrialHandler) -> RigResult<()> {
        self.check_transition(target)?;
        let now = self.clock.now();
        if self.started {
            self.logger.write(EventRecord::Phase {
                trial: self.phase_trial,
                phase: self.phase,
                start: self.phase_start,
                end: now,
            });
        }
        self.started = true;

        let Some(t) = self.trial.as_mut() else {
            return Err(RigError::Invariant("phase change without a trial".into()));
        };
        self.phase = target;
        self.phase_trial = t.idx;
        self.phase_start = now;
        t.last_hint = now;
        debug!("Trial {} -> {}", t.idx, target);

        self.phase_duration = match target {
            Phase::Intro => self.settings.intro_duration,
            Phase::Stim => t.stim_duration,
            Phase::Delay => t.delay,
            Phase::Lick => self.settings.lick_duration,
            Phase::Reward => self.settings.reward_duration,
            Phase::Iti if t.rewarded => self.settings.iti_duration,
            Phase::Iti => self.settings.iti_duration * (1.0 + self.settings.penalty_iti_frac),
            Phase::End => 0.0,
        };
        let manipulation = t.manipulation;
        let tag = SyncTag {
            trial: t.idx,
            phase: target,
        };

        let tag_str = tag.to_string();
        self.trigger("imaging", &tag_str, None, target.code() as f64, |hw| hw.imaging_sync(tag));
        let opto = manipulation.opto_active(target);
        self.trigger("opto", if opto { "on" } else { "off" }, None, manipulation.code() as f64, |hw| {
            hw.opto_set(opto)
        });

        match target {
            Phase::Intro => {
                self.set_light(false);
                self.play(Cue::Intro);
            }
            Phase::Lick => {
                if self.settings.retract_ports {
                    self.trigger("actuator", "extend", None, 0.0, |hw| hw.actuator_extend());
                }
                if self.settings.go_cue.light() {
                    self.set_light(true);
                }
                if self.settings.go_cue.sound() {
                    self.play(Cue::Go);
                }
            }
            Phase::Reward => {
                if self.settings.go_cue.light() {
                    self.set_light(true);
                }
            }
            Phase::Iti => {
                if self.settings.retract_ports {
                    self.trigger("actuator", "retract", None, 0.0, |hw| hw.actuator_retract());
                }
                self.set_light(false);
            }
            Phase::End => self.finish_trial(handler)?,
            Phase::Stim | Phase::Delay => {}
        }
        Ok(())
    }

    /// Resolve the outcome and hand the trial back to the handler.
    fn finish_trial(&mut self, handler: &mut TrialHandler) -> RigResult<()> {
        let Some(t) = self.trial.as_ref() else {
            return Err(RigError::Invariant("END without a trial".into()));
        };
        let inputs = OutcomeInputs {
            rule: t.rule,
            side: t.side,
            use_trials: self.settings.use_trials,
            earned: t.earned,
            killed: t.killed,
            early: t.early,
            licks: &self.licks,
        };
        check_strict_reward(&inputs)?;
        let outcome = resolve_outcome(&inputs)?;
        handler.end_trial(outcome, t.rewarded, t.delivered)?;
        Ok(())
    }

    /// Write the final END record and release the hardware.
    pub fn close(&mut self) -> RigResult<()> {
        if self.started {
            if self.phase != Phase::End {
                warn!("Closing engine mid-trial in {}", self.phase);
            }
            self.logger.write(EventRecord::Phase {
                trial: self.phase_trial,
                phase: self.phase,
                start: self.phase_start,
                end: self.clock.now(),
            });
            self.started = false;
        }
        if self.holding {
            self.control.unpause();
            self.holding = false;
        }
        self.set_light(false);
        self.trigger("opto", "off", None, 0.0, |hw| hw.opto_set(false));
        self.trigger("rig", "end", None, 0.0, |hw| hw.end());
        if let Some(poller) = self.sensors.take() {
            poller.stop()?;
        }
        Ok(())
    }

    /// Send the manipulator to `pos`. Failure is an advisory.
    pub fn move_manipulator(&mut self, pos: Position) -> bool {
        self.trigger("manipulator", "goto", None, 0.0, |hw| hw.manipulator_goto(pos))
    }

    // =========================================================================
    // PHASE BODIES
    // =========================================================================

    /// Record the first STIM/DELAY lick as early. True if the trial aborts.
    fn abort_on_early(&mut self, phase: Phase) -> bool {
        let Some(first) = self.licks.in_phase(phase).next().map(|l| l.side) else {
            return false;
        };
        if let Some(t) = self.trial.as_mut() {
            t.early = Some(first);
        }
        info!("Early lick ({}) in {}", first, phase);
        true
    }

    /// Open the stimulus valve for every timeline event now due. Only puffs
    /// the valve accepted count as delivered.
    fn deliver_stimuli(&mut self, elapsed: f64) {
        let secs = self.settings.stim_valve_duration;
        loop {
            let Some(t) = self.trial.as_mut() else {
                return;
            };
            let Some(ev) = t.stimuli.get(t.next_stim).copied() else {
                return;
            };
            if elapsed < ev.time {
                return;
            }
            t.next_stim += 1;
            let opened = self.trigger(ValveKind::Stimulus.device(), "open", Some(ev.side), secs, |hw| {
                hw.valve_open(ValveKind::Stimulus, ev.side, secs)
            });
            if opened && let Some(t) = self.trial.as_mut() {
                t.delivered[ev.side.index()] += 1;
            }
        }
    }

    /// Repeat the correct-side stimulus at normally distributed intervals.
    fn maybe_hint(&mut self, now: f64, side: Side) {
        let mean = self.settings.hint_interval.0;
        let Some(t) = self.trial.as_mut() else {
            return;
        };
        if now - t.last_hint <= t.next_hint {
            return;
        }
        t.last_hint = now;
        let draw = self.hint_gap.sample(&mut self.rng);
        t.next_hint = if draw < 0.0 { mean } else { draw };

        let secs = self.settings.stim_valve_duration;
        self.trigger(ValveKind::Stimulus.device(), "hint", Some(side), secs, |hw| {
            hw.valve_open(ValveKind::Stimulus, side, secs)
        });
    }

    // =========================================================================
    // SENSORS AND EFFECTS
    // =========================================================================

    fn read_sensors(&mut self) -> Option<SensorReading> {
        if let Some(poller) = &self.sensors {
            return Some(poller.take());
        }
        match self.hw.sensor_poll() {
            Ok(reading) => Some(reading),
            Err(e) => {
                debug!("Sensor poll failed: {}", e);
                None
            }
        }
    }

    /// Record new licks and apply the hold rule.
    fn update_licks(&mut self, now: f64) {
        let Some(reading) = self.read_sensors() else {
            return;
        };
        self.moving = reading.moving;
        for side in reading.licked_sides() {
            self.licks.push(LickEvent {
                phase: self.phase,
                ts: now,
                side,
            });
            self.logger.write(EventRecord::Lick {
                trial: self.phase_trial,
                phase: self.phase,
                side,
                ts: now,
            });
        }

        if !self.settings.hold_rule {
            return;
        }
        if !self.holding && reading.holding {
            self.holding = true;
            self.control.pause();
            self.play(Cue::Pop);
            info!("Holding detected, pausing");
        } else if self.holding && !reading.holding {
            self.holding = false;
            self.control.unpause();
            info!("Hold released");
        }
    }

    fn set_light(&mut self, on: bool) {
        if self.light == Some(on) {
            return;
        }
        self.light = Some(on);
        self.trigger("light", if on { "on" } else { "off" }, None, f64::from(u8::from(on)), |hw| {
            hw.light_set(on)
        });
    }

    fn play(&mut self, cue: Cue) {
        self.trigger("speaker", cue.name(), None, 0.0, |hw| hw.sound(cue));
    }

    /// Run one hardware call; log it on success, downgrade failure to a warning.
    fn trigger<F>(&mut self, device: &str, action: &str, side: Option<Side>, value: f64, call: F) -> bool
    where
        F: FnOnce(&mut H) -> Result<(), HardwareError>,
    {
        match call(&mut self.hw) {
            Ok(()) => {
                self.logger.write(EventRecord::hardware(device, action, side, value));
                true
            }
            Err(e) => {
                warn!("Hardware advisory ({} {}): {}", device, action, e);
                false
            }
        }
    }
}
