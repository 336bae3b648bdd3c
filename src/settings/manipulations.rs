//! Manipulations
//!
//! A manipulation is a perturbation applied on some trials of a session, e.g.
//! optogenetic illumination during a subset of phases. Levels either fix one
//! manipulation or draw from a weighted set.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};

use crate::error::{RigError, RigResult};
use crate::phases::Phase;

/// Per-trial manipulation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manipulation {
    #[default]
    None,
    /// Opto on during STIM and DELAY
    OptoStimDelay,
    /// Opto on during LICK
    OptoLick,
    /// Opto on during REWARD and ITI
    OptoRewardIti,
}

impl Manipulation {
    /// Whether the opto light should be on in `phase`.
    pub fn opto_active(self, phase: Phase) -> bool {
        match self {
            Manipulation::None => false,
            Manipulation::OptoStimDelay => matches!(phase, Phase::Stim | Phase::Delay),
            Manipulation::OptoLick => phase == Phase::Lick,
            Manipulation::OptoRewardIti => matches!(phase, Phase::Reward | Phase::Iti),
        }
    }

    /// Stored numeric id.
    pub fn code(self) -> i64 {
        match self {
            Manipulation::None => 0,
            Manipulation::OptoStimDelay => 1,
            Manipulation::OptoLick => 2,
            Manipulation::OptoRewardIti => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Manipulation> {
        [
            Manipulation::None,
            Manipulation::OptoStimDelay,
            Manipulation::OptoLick,
            Manipulation::OptoRewardIti,
        ]
        .into_iter()
        .find(|m| m.code() == code)
    }

    /// Short label for display.
    pub fn label(self) -> &'static str {
        match self {
            Manipulation::None => "none",
            Manipulation::OptoStimDelay => "stim/delay",
            Manipulation::OptoLick => "lick",
            Manipulation::OptoRewardIti => "reward/iti",
        }
    }
}

/// Either a fixed manipulation or a weighted draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManipulationSpec {
    Fixed(Manipulation),
    Weighted {
        choices: Vec<Manipulation>,
        weights: Vec<f64>,
    },
}

impl Default for ManipulationSpec {
    fn default() -> Self {
        ManipulationSpec::Fixed(Manipulation::None)
    }
}

impl ManipulationSpec {
    /// Look up a named preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "none" => Some(ManipulationSpec::Fixed(Manipulation::None)),
            "opto_stim_lick_rew" => Some(ManipulationSpec::Weighted {
                choices: vec![
                    Manipulation::None,
                    Manipulation::OptoStimDelay,
                    Manipulation::OptoLick,
                    Manipulation::OptoRewardIti,
                ],
                weights: vec![0.85, 0.06, 0.03, 0.06],
            }),
            "opto_stim" => Some(ManipulationSpec::Weighted {
                choices: vec![Manipulation::None, Manipulation::OptoStimDelay],
                weights: vec![0.88, 0.12],
            }),
            _ => None,
        }
    }

    pub const PRESET_NAMES: [&'static str; 3] = ["none", "opto_stim_lick_rew", "opto_stim"];

    /// Check that weighted specs can be sampled.
    pub fn validate(&self) -> RigResult<()> {
        if let ManipulationSpec::Weighted { choices, weights } = self {
            if choices.is_empty() || choices.len() != weights.len() {
                return Err(RigError::Config(format!(
                    "manipulation has {} choices but {} weights",
                    choices.len(),
                    weights.len()
                )));
            }
            WeightedIndex::new(weights)
                .map_err(|e| RigError::Config(format!("bad manipulation weights: {}", e)))?;
        }
        Ok(())
    }

    /// Draw a manipulation for the next trial.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> RigResult<Manipulation> {
        match self {
            ManipulationSpec::Fixed(m) => Ok(*m),
            ManipulationSpec::Weighted { choices, weights } => {
                let dist = WeightedIndex::new(weights)
                    .map_err(|e| RigError::Precondition(format!("bad manipulation weights: {}", e)))?;
                choices
                    .get(dist.sample(rng))
                    .copied()
                    .ok_or_else(|| RigError::Precondition("manipulation choices empty".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_opto_phase_lookup() {
        assert!(Manipulation::OptoStimDelay.opto_active(Phase::Stim));
        assert!(Manipulation::OptoStimDelay.opto_active(Phase::Delay));
        assert!(!Manipulation::OptoStimDelay.opto_active(Phase::Lick));
        assert!(Manipulation::OptoLick.opto_active(Phase::Lick));
        assert!(Manipulation::OptoRewardIti.opto_active(Phase::Iti));
        assert!(!Manipulation::None.opto_active(Phase::Stim));
    }

    #[test]
    fn test_presets_validate() {
        for name in ManipulationSpec::PRESET_NAMES {
            let spec = ManipulationSpec::preset(name).unwrap();
            assert!(spec.validate().is_ok(), "{}", name);
        }
        assert!(ManipulationSpec::preset("bogus").is_none());
    }

    #[test]
    fn test_weighted_sample_mostly_none() {
        let spec = ManipulationSpec::preset("opto_stim").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n_none = (0..2000)
            .filter(|_| spec.sample(&mut rng).unwrap() == Manipulation::None)
            .count();
        assert!(n_none > 1600 && n_none < 1920, "n_none = {}", n_none);
    }

    #[test]
    fn test_mismatched_weights_rejected() {
        let spec = ManipulationSpec::Weighted {
            choices: vec![Manipulation::None],
            weights: vec![0.5, 0.5],
        };
        assert!(spec.validate().is_err());
    }
}
