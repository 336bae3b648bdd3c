//! Simulated rig
//!
//! Records every command it receives and produces licks either from a
//! script or from a virtual subject that watches the stimulus valve and the
//! imaging sync channel. Clones share state, so a test can keep one handle
//! while the engine owns another.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Cue, Hardware, Position, SensorReading, SensorSource, SyncTag, ValveKind};
use crate::clock::Clock;
use crate::error::HardwareError;
use crate::phases::Phase;
use crate::trials::Side;

/// Virtual subject behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectModel {
    /// Probability of licking the majority-evidence side
    pub accuracy: f64,
    /// Probability of responding at all in the response window
    pub lick_prob: f64,
    /// Probability of licking during STIM
    pub early_prob: f64,
    /// Response latency after the window opens (s)
    pub latency: f64,
}

impl Default for SubjectModel {
    fn default() -> Self {
        Self {
            accuracy: 0.8,
            lick_prob: 0.9,
            early_prob: 0.05,
            latency: 0.35,
        }
    }
}

/// A command as seen by the rig.
#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    Valve { kind: ValveKind, side: Side, secs: f64 },
    Light(bool),
    Sound(Cue),
    ActuatorExtend,
    ActuatorRetract,
    Opto(bool),
    Goto(Position),
    Nudge(Side),
    Sync(SyncTag),
    End,
}

struct SimState {
    clock: Arc<dyn Clock>,
    rng: StdRng,
    subject: Option<SubjectModel>,
    /// (time, side), consumed once the clock passes them
    pending: Vec<(f64, Side)>,
    holding: bool,
    moving: bool,
    evidence: [usize; 2],
    calls: Vec<HwCall>,
    failing: HashSet<&'static str>,
}

impl SimState {
    fn check(&self, device: &'static str) -> Result<(), HardwareError> {
        if self.failing.contains(device) {
            Err(HardwareError::Unavailable { device })
        } else {
            Ok(())
        }
    }

    fn schedule(&mut self, at: f64, side: Side) {
        self.pending.push((at, side));
        self.pending.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    fn on_phase(&mut self, phase: Phase) {
        let Some(model) = self.subject else {
            return;
        };
        let now = self.clock.now();
        match phase {
            Phase::Stim => {
                self.evidence = [0, 0];
                if self.rng.gen_bool(model.early_prob.clamp(0.0, 1.0)) {
                    let side = if self.rng.gen_bool(0.5) { Side::Left } else { Side::Right };
                    let at = now + self.rng.gen_range(0.0..0.5);
                    self.schedule(at, side);
                }
            }
            Phase::Lick => {
                if !self.rng.gen_bool(model.lick_prob.clamp(0.0, 1.0)) {
                    return;
                }
                let [l, r] = self.evidence;
                let majority = if l == r {
                    if self.rng.gen_bool(0.5) { Side::Left } else { Side::Right }
                } else if r > l {
                    Side::Right
                } else {
                    Side::Left
                };
                let side = if self.rng.gen_bool(model.accuracy.clamp(0.0, 1.0)) {
                    majority
                } else {
                    majority.opposite()
                };
                self.schedule(now + model.latency, side);
            }
            _ => {}
        }
    }

    fn poll(&mut self) -> SensorReading {
        let now = self.clock.now();
        let mut reading = SensorReading {
            licked: [false, false],
            holding: self.holding,
            moving: self.moving,
        };
        let due = self.pending.iter().take_while(|(t, _)| *t <= now).count();
        for (_, side) in self.pending.drain(..due) {
            reading.licked[side.index()] = true;
        }
        reading
    }
}

/// In-process stand-in for the rig hardware.
#[derive(Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRig {
    /// Rig whose licks come only from [`SimulatedRig::script_lick`].
    pub fn scripted(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, None, 0)
    }

    /// Rig driven by a virtual subject.
    pub fn with_subject(clock: Arc<dyn Clock>, model: SubjectModel, seed: u64) -> Self {
        Self::build(clock, Some(model), seed)
    }

    fn build(clock: Arc<dyn Clock>, subject: Option<SubjectModel>, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                clock,
                rng: StdRng::seed_from_u64(seed),
                subject,
                pending: Vec::new(),
                holding: false,
                moving: true,
                evidence: [0, 0],
                calls: Vec::new(),
                failing: HashSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a lick on `side` once the clock reaches `at`.
    pub fn script_lick(&self, at: f64, side: Side) {
        self.lock().schedule(at, side);
    }

    pub fn set_holding(&self, holding: bool) {
        self.lock().holding = holding;
    }

    pub fn set_moving(&self, moving: bool) {
        self.lock().moving = moving;
    }

    /// Make every call to `device` fail.
    pub fn fail_device(&self, device: &'static str) {
        self.lock().failing.insert(device);
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.lock().calls.clone()
    }

    /// Sensor handle for a [`super::SensorPoller`].
    pub fn sensor_source(&self) -> SimSensor {
        SimSensor { rig: self.clone() }
    }

    fn command(&mut self, device: &'static str, call: HwCall) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.check(device)?;
        state.calls.push(call);
        Ok(())
    }
}

impl Hardware for SimulatedRig {
    fn valve_open(&mut self, kind: ValveKind, side: Side, secs: f64) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.check(kind.device())?;
        if kind == ValveKind::Stimulus {
            state.evidence[side.index()] += 1;
        }
        state.calls.push(HwCall::Valve { kind, side, secs });
        Ok(())
    }

    fn light_set(&mut self, on: bool) -> Result<(), HardwareError> {
        self.command("light", HwCall::Light(on))
    }

    fn sound(&mut self, cue: Cue) -> Result<(), HardwareError> {
        self.command("speaker", HwCall::Sound(cue))
    }

    fn actuator_extend(&mut self) -> Result<(), HardwareError> {
        self.command("actuator", HwCall::ActuatorExtend)
    }

    fn actuator_retract(&mut self) -> Result<(), HardwareError> {
        self.command("actuator", HwCall::ActuatorRetract)
    }

    fn opto_set(&mut self, on: bool) -> Result<(), HardwareError> {
        self.command("opto", HwCall::Opto(on))
    }

    fn manipulator_goto(&mut self, pos: Position) -> Result<(), HardwareError> {
        self.command("manipulator", HwCall::Goto(pos))
    }

    fn manipulator_nudge(&mut self, toward: Side) -> Result<(), HardwareError> {
        self.command("manipulator", HwCall::Nudge(toward))
    }

    fn sensor_poll(&mut self) -> Result<SensorReading, HardwareError> {
        let mut state = self.lock();
        state.check("sensor")?;
        Ok(state.poll())
    }

    fn imaging_sync(&mut self, tag: SyncTag) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.on_phase(tag.phase);
        state.check("imaging")?;
        state.calls.push(HwCall::Sync(tag));
        Ok(())
    }

    fn end(&mut self) -> Result<(), HardwareError> {
        self.command("rig", HwCall::End)
    }
}

/// Sensor side of a [`SimulatedRig`], for the background poller.
pub struct SimSensor {
    rig: SimulatedRig,
}

impl SensorSource for SimSensor {
    fn read(&mut self) -> Result<SensorReading, HardwareError> {
        self.rig.sensor_poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_scripted_licks_fire_once() {
        let clock = ManualClock::new();
        let mut rig = SimulatedRig::scripted(Arc::new(clock.clone()));
        rig.script_lick(1.0, Side::Right);

        assert_eq!(rig.sensor_poll().unwrap().licked, [false, false]);
        clock.set(1.0);
        assert_eq!(rig.sensor_poll().unwrap().licked, [false, true]);
        assert_eq!(rig.sensor_poll().unwrap().licked, [false, false]);
    }

    #[test]
    fn test_failure_injection() {
        let clock = ManualClock::new();
        let mut rig = SimulatedRig::scripted(Arc::new(clock));
        rig.fail_device("opto");
        assert!(rig.opto_set(true).is_err());
        assert!(rig.light_set(true).is_ok());
        assert_eq!(rig.calls(), vec![HwCall::Light(true)]);
    }

    #[test]
    fn test_subject_follows_evidence() {
        let clock = ManualClock::new();
        let model = SubjectModel {
            accuracy: 1.0,
            lick_prob: 1.0,
            early_prob: 0.0,
            latency: 0.2,
        };
        let mut rig = SimulatedRig::with_subject(Arc::new(clock.clone()), model, 3);
        rig.imaging_sync(SyncTag {
            trial: 0,
            phase: Phase::Stim,
        })
        .unwrap();
        for _ in 0..3 {
            rig.valve_open(ValveKind::Stimulus, Side::Right, 0.015).unwrap();
        }
        rig.valve_open(ValveKind::Stimulus, Side::Left, 0.015).unwrap();
        rig.imaging_sync(SyncTag {
            trial: 0,
            phase: Phase::Lick,
        })
        .unwrap();

        assert_eq!(rig.sensor_poll().unwrap().licked, [false, false]);
        clock.advance(0.2);
        assert_eq!(rig.sensor_poll().unwrap().licked, [false, true]);
    }
}
