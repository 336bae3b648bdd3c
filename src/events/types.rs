//! Logged record types
//!
//! Every producer writes one of these. The logger stamps each record with the
//! producer's local clock and the wall clock on enqueue.

use serde::{Deserialize, Serialize};

use crate::phases::Phase;
use crate::trials::{Side, Trial};

/// Record kinds. Each kind is buffered and stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Trials,
    TrialsTiming,
    Phases,
    Licks,
    Analog,
    Hardware,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Trials,
        RecordKind::TrialsTiming,
        RecordKind::Phases,
        RecordKind::Licks,
        RecordKind::Analog,
        RecordKind::Hardware,
    ];

    /// Name used for tables, crash dumps and flush thresholds.
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Trials => "trials",
            RecordKind::TrialsTiming => "trials_timing",
            RecordKind::Phases => "phases",
            RecordKind::Licks => "licks",
            RecordKind::Analog => "analog",
            RecordKind::Hardware => "hardware",
        }
    }

    pub fn from_name(name: &str) -> Option<RecordKind> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload of a logged record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRecord {
    /// Finalized trial, written once at END
    Trial(Trial),
    /// One stimulus of a trial's timeline
    Stimulus { trial: usize, side: Side, time: f64 },
    /// One traversed phase
    Phase {
        trial: usize,
        phase: Phase,
        start: f64,
        end: f64,
    },
    Lick {
        trial: usize,
        phase: Phase,
        side: Side,
        ts: f64,
    },
    /// Sensor sample from the poller
    Analog {
        licked: [bool; 2],
        holding: bool,
        moving: bool,
    },
    /// Hardware command issued by the engine or session
    Hardware {
        device: String,
        action: String,
        side: Option<Side>,
        value: f64,
    },
}

impl EventRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            EventRecord::Trial(_) => RecordKind::Trials,
            EventRecord::Stimulus { .. } => RecordKind::TrialsTiming,
            EventRecord::Phase { .. } => RecordKind::Phases,
            EventRecord::Lick { .. } => RecordKind::Licks,
            EventRecord::Analog { .. } => RecordKind::Analog,
            EventRecord::Hardware { .. } => RecordKind::Hardware,
        }
    }

    pub fn hardware(device: &str, action: &str, side: Option<Side>, value: f64) -> Self {
        EventRecord::Hardware {
            device: device.to_string(),
            action: action.to_string(),
            side,
            value,
        }
    }
}

/// A record with the timestamps taken when it was enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedRecord {
    pub ts_local: f64,
    pub ts_global: f64,
    pub record: EventRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_record() {
        let rec = EventRecord::Lick {
            trial: 3,
            phase: Phase::Lick,
            side: Side::Left,
            ts: 1.0,
        };
        assert_eq!(rec.kind(), RecordKind::Licks);
        assert_eq!(
            EventRecord::hardware("valve", "open", Some(Side::Right), 0.07).kind(),
            RecordKind::Hardware
        );
    }

    #[test]
    fn test_record_json_tagged() {
        let rec = EventRecord::Stimulus {
            trial: 0,
            side: Side::Right,
            time: 0.25,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"type\":\"stimulus\""));
        assert!(json.contains("\"side\":\"right\""));
    }
}
