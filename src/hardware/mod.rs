//! Hardware interface
//!
//! The capability set the engine drives: valves, cue light, speaker, port
//! actuator, opto LED, micromanipulator, sensors and the imaging sync
//! channel. Vendor drivers live outside this crate; [`SimulatedRig`] stands
//! in for them in dry runs and tests.

mod poller;
mod sim;

pub use poller::{SensorPoller, SensorSource};
pub use sim::{HwCall, SimSensor, SimulatedRig, SubjectModel};

use serde::{Deserialize, Serialize};

use crate::error::HardwareError;
use crate::phases::Phase;
use crate::trials::Side;

/// Manipulator coordinates (micrometers).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Which valve bank to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValveKind {
    /// Air-puff stimulator
    Stimulus,
    /// Water spout
    Reward,
}

impl ValveKind {
    pub fn device(self) -> &'static str {
        match self {
            ValveKind::Stimulus => "stimulator",
            ValveKind::Reward => "spout",
        }
    }
}

/// Speaker cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// Trial start
    Intro,
    /// Response window open
    Go,
    /// Wrong-side lick under strict rules
    Wrong,
    /// Early lick
    Error,
    /// Holding the ports
    Pop,
}

impl Cue {
    pub fn name(self) -> &'static str {
        match self {
            Cue::Intro => "intro",
            Cue::Go => "go",
            Cue::Wrong => "wrong",
            Cue::Error => "error",
            Cue::Pop => "pop",
        }
    }
}

/// One sensor sample. `licked` is indexed by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorReading {
    pub licked: [bool; 2],
    pub holding: bool,
    pub moving: bool,
}

impl SensorReading {
    /// Fold a newer sample into a latched one: licks accumulate, levels
    /// take the newer value.
    pub fn merge(&mut self, newer: SensorReading) {
        self.licked[0] |= newer.licked[0];
        self.licked[1] |= newer.licked[1];
        self.holding = newer.holding;
        self.moving = newer.moving;
    }

    /// Sides that licked in this sample.
    pub fn licked_sides(&self) -> impl Iterator<Item = Side> + '_ {
        Side::BOTH.into_iter().filter(|s| self.licked[s.index()])
    }
}

/// Imaging sync tag, sent on every phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTag {
    pub trial: usize,
    pub phase: Phase,
}

impl std::fmt::Display for SyncTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.trial, self.phase.code())
    }
}

/// Rig capabilities consumed by the phase engine.
///
/// Every call may fail with a [`HardwareError`]; the engine logs the failure
/// and carries on.
pub trait Hardware: Send {
    /// Open a valve for `secs` seconds.
    fn valve_open(&mut self, kind: ValveKind, side: Side, secs: f64) -> Result<(), HardwareError>;

    fn light_set(&mut self, on: bool) -> Result<(), HardwareError>;

    fn sound(&mut self, cue: Cue) -> Result<(), HardwareError>;

    fn actuator_extend(&mut self) -> Result<(), HardwareError>;

    fn actuator_retract(&mut self) -> Result<(), HardwareError>;

    fn opto_set(&mut self, on: bool) -> Result<(), HardwareError>;

    fn manipulator_goto(&mut self, pos: Position) -> Result<(), HardwareError>;

    /// Step the manipulator one unit toward `toward`.
    fn manipulator_nudge(&mut self, toward: Side) -> Result<(), HardwareError>;

    /// Licks since the last poll plus the current holding/moving levels.
    fn sensor_poll(&mut self) -> Result<SensorReading, HardwareError>;

    fn imaging_sync(&mut self, tag: SyncTag) -> Result<(), HardwareError>;

    /// Release devices at session end.
    fn end(&mut self) -> Result<(), HardwareError> {
        Ok(())
    }
}
