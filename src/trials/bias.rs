//! Side selection and anti-bias policies
//!
//! All three policies read the same signal: per-side accuracy over the last
//! `correction_window` valid trials of each side, normalized to sum to one.
//! The normalized pair ("biases") is kept between trials and only refreshed
//! when side selection gets far enough to compute it.

use rand::Rng;
use rand::seq::SliceRandom;

use super::types::{Side, Trial};
use crate::settings::TrialParams;

/// Anti-bias configuration, taken from the trial parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasParams {
    pub enabled: bool,
    pub window: usize,
    pub max_bias_correction: f64,
    pub min_bias_for_correction: f64,
    pub reward_scaling_threshold: f64,
    pub antibias_reward_scales: Vec<f64>,
    pub nudge_threshold: f64,
    pub nudge_trials: usize,
    pub nudge_max: i32,
}

impl From<&TrialParams> for BiasParams {
    fn from(p: &TrialParams) -> Self {
        Self {
            enabled: p.bias_correction,
            window: p.correction_window,
            max_bias_correction: p.max_bias_correction,
            min_bias_for_correction: p.min_bias_for_correction,
            reward_scaling_threshold: p.reward_scaling_threshold,
            antibias_reward_scales: p.antibias_reward_scales.clone(),
            nudge_threshold: p.nudge_threshold,
            nudge_trials: p.nudge_trials,
            nudge_max: p.nudge_max,
        }
    }
}

/// What side selection knows about the upcoming trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideContext {
    /// Index the new trial will get
    pub idx: usize,
    /// Alternate sides by trial parity
    pub alternate: bool,
    /// An intro ladder is running
    pub in_intro: bool,
}

/// Chosen side plus the draw probability recorded with the trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideChoice {
    pub side: Side,
    /// Normalized left accuracy, used as P(right); 0.5 when no correction applied
    pub draw_p: f64,
}

/// Stateful anti-bias controller owned by the trial handler.
#[derive(Debug, Clone)]
pub struct BiasController {
    params: BiasParams,
    biases: Option<[f64; 2]>,
    nudge_streak: usize,
    nudge_total: i32,
}

fn argmin(v: [f64; 2]) -> usize {
    if v[1] < v[0] { 1 } else { 0 }
}

fn argmax(v: [f64; 2]) -> usize {
    if v[1] > v[0] { 1 } else { 0 }
}

impl BiasController {
    pub fn new(params: BiasParams) -> Self {
        Self {
            params,
            biases: None,
            nudge_streak: 0,
            nudge_total: 0,
        }
    }

    pub fn biases(&self) -> Option<[f64; 2]> {
        self.biases
    }

    /// Net manipulator nudges so far (negative = left).
    pub fn nudge_total(&self) -> i32 {
        self.nudge_total
    }

    /// Pick the side of the next trial.
    pub fn next_side<R: Rng>(&mut self, rng: &mut R, trials: &[Trial], ctx: SideContext) -> SideChoice {
        let uniform = SideChoice {
            side: if rng.gen_bool(0.5) { Side::Left } else { Side::Right },
            draw_p: 0.5,
        };

        if ctx.alternate {
            return SideChoice {
                side: Side::by_parity(ctx.idx),
                draw_p: 0.5,
            };
        }

        // No three identical sides in a row during intros
        if ctx.in_intro && trials.len() >= 3 {
            let last = &trials[trials.len() - 3..];
            if last.iter().all(|t| t.side == last[0].side) {
                return SideChoice {
                    side: last[0].side.opposite(),
                    draw_p: 0.5,
                };
            }
        }

        if !self.params.enabled {
            return uniform;
        }

        let Some(percs) = self.side_accuracy(trials) else {
            return uniform;
        };
        if percs[0] == percs[1] {
            self.biases = Some([0.5, 0.5]);
            return uniform;
        }

        let sum = percs[0] + percs[1];
        let mut biases = [percs[0] / sum, percs[1] / sum];
        let max_corr = self.params.max_bias_correction;
        if biases[argmin(biases)] <= max_corr {
            let lo = argmin(biases);
            biases[lo] = max_corr;
            biases[1 - lo] = 1.0 - max_corr;
        }
        self.biases = Some(biases);

        if biases[0].max(biases[1]) < self.params.min_bias_for_correction {
            return uniform;
        }

        // The weaker side gets the stronger side's weight
        let side = if rng.gen_bool(biases[1].clamp(0.0, 1.0)) {
            Side::Left
        } else {
            Side::Right
        };
        SideChoice {
            side,
            draw_p: biases[0],
        }
    }

    /// Per-side fraction correct over the last `window` valid trials of each
    /// side. None until both sides have a full window.
    fn side_accuracy(&self, trials: &[Trial]) -> Option<[f64; 2]> {
        let window = self.params.window.max(1);
        let mut percs = [0.0; 2];
        for s in Side::BOTH {
            let recent: Vec<&Trial> = trials
                .iter()
                .rev()
                .filter(|t| t.side == s && t.is_valid())
                .take(window)
                .collect();
            if recent.len() < window {
                return None;
            }
            let correct = recent.iter().filter(|t| t.is_correct()).count();
            percs[s.index()] = correct as f64 / window as f64;
        }
        Some(percs)
    }

    /// Reward multiplier for a trial on `side`. Only the disadvantaged side
    /// gets scaled, and only once its bias falls to the threshold.
    pub fn reward_scale<R: Rng>(&self, rng: &mut R, side: Side) -> f64 {
        let Some(biases) = self.biases else {
            return 1.0;
        };
        let lo = argmin(biases);
        if biases[lo] > self.params.reward_scaling_threshold || lo != side.index() {
            return 1.0;
        }
        self.params
            .antibias_reward_scales
            .choose(rng)
            .copied()
            .unwrap_or(1.0)
    }

    /// Decide whether to nudge the manipulator toward the favored side.
    ///
    /// A nudge fires after `nudge_trials` consecutive biased trials, unless it
    /// would bring the net nudge count to `nudge_max` in magnitude.
    pub fn check_nudge(&mut self, enabled: bool) -> Option<Side> {
        if !enabled {
            return None;
        }
        let biases = match self.biases {
            Some(b) if b[argmin(b)] <= self.params.nudge_threshold => b,
            _ => {
                self.nudge_streak = 0;
                return None;
            }
        };
        self.nudge_streak += 1;
        if self.nudge_streak < self.params.nudge_trials {
            return None;
        }

        let good = argmax(biases);
        let inc = if good == 0 { -1 } else { 1 };
        if (self.nudge_total + inc).abs() >= self.params.nudge_max {
            return None;
        }
        self.nudge_streak = 0;
        self.nudge_total += inc;
        Side::from_index(good)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::types::{Outcome, finished_trial};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params(window: usize) -> BiasParams {
        BiasParams {
            window,
            ..BiasParams::from(&TrialParams::default())
        }
    }

    /// `n` valid trials per side with the given number correct, interleaved.
    fn history(n: usize, correct_left: usize, correct_right: usize) -> Vec<Trial> {
        let mut trials = Vec::new();
        for i in 0..n {
            let l = if i < correct_left { Outcome::Correct } else { Outcome::Incorrect };
            let r = if i < correct_right { Outcome::Correct } else { Outcome::Incorrect };
            trials.push(finished_trial(2 * i, Side::Left, l, 3));
            trials.push(finished_trial(2 * i + 1, Side::Right, r, 3));
        }
        trials
    }

    fn ctx(idx: usize) -> SideContext {
        SideContext {
            idx,
            alternate: false,
            in_intro: false,
        }
    }

    #[test]
    fn test_skews_toward_weaker_right_side() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut bias = BiasController::new(params(10));
        let trials = history(10, 9, 3);

        let mut rights = 0;
        for _ in 0..2000 {
            let choice = bias.next_side(&mut rng, &trials, ctx(trials.len()));
            assert!((choice.draw_p - 0.75).abs() < 1e-12);
            if choice.side == Side::Right {
                rights += 1;
            }
        }
        // P(right) = 0.75, and left is never drawn below max_bias_correction
        assert!(rights > 1400 && rights < 1600, "rights = {}", rights);
        let b = bias.biases().unwrap();
        assert!(b[0].min(b[1]) >= 0.2);
    }

    #[test]
    fn test_extreme_bias_clamped() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut bias = BiasController::new(params(6));
        let trials = history(6, 6, 0);
        let choice = bias.next_side(&mut rng, &trials, ctx(12));
        let b = bias.biases().unwrap();
        assert!((b[0] - 0.8).abs() < 1e-12 && (b[1] - 0.2).abs() < 1e-12);
        assert!((choice.draw_p - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_history_is_uniform() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut bias = BiasController::new(params(6));
        let trials = history(5, 5, 0);
        let choice = bias.next_side(&mut rng, &trials, ctx(10));
        assert_eq!(choice.draw_p, 0.5);
        assert_eq!(bias.biases(), None);
    }

    #[test]
    fn test_weak_bias_not_corrected() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut bias = BiasController::new(params(10));
        // 0.6 vs 0.5 normalizes to 0.545, below min_bias_for_correction
        let trials = history(10, 6, 5);
        let choice = bias.next_side(&mut rng, &trials, ctx(20));
        assert_eq!(choice.draw_p, 0.5);
        assert!(bias.biases().is_some());
    }

    #[test]
    fn test_equal_accuracy_resets_biases() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut bias = BiasController::new(params(6));
        bias.next_side(&mut rng, &history(6, 3, 3), ctx(12));
        assert_eq!(bias.biases(), Some([0.5, 0.5]));
    }

    #[test]
    fn test_alternation_by_parity() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bias = BiasController::new(params(6));
        let trials = history(6, 6, 0);
        for idx in 0..6 {
            let c = bias.next_side(
                &mut rng,
                &trials,
                SideContext {
                    idx,
                    alternate: true,
                    in_intro: false,
                },
            );
            assert_eq!(c.side, Side::by_parity(idx));
        }
    }

    #[test]
    fn test_intro_forbids_three_in_a_row() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bias = BiasController::new(BiasParams {
            enabled: false,
            ..params(6)
        });
        let trials: Vec<Trial> = (0..3).map(|i| finished_trial(i, Side::Right, Outcome::Correct, 0)).collect();
        let intro = SideContext {
            idx: 3,
            alternate: false,
            in_intro: true,
        };
        for _ in 0..20 {
            assert_eq!(bias.next_side(&mut rng, &trials, intro).side, Side::Left);
        }
    }

    #[test]
    fn test_reward_scale_only_on_disadvantaged_side() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut bias = BiasController::new(params(6));
        assert_eq!(bias.reward_scale(&mut rng, Side::Right), 1.0);

        bias.next_side(&mut rng, &history(6, 6, 0), ctx(12));
        // biases [0.8, 0.2]: right is disadvantaged
        assert_eq!(bias.reward_scale(&mut rng, Side::Left), 1.0);
        for _ in 0..20 {
            let s = bias.reward_scale(&mut rng, Side::Right);
            assert!([1.0, 1.2, 1.4].contains(&s));
        }
    }

    #[test]
    fn test_nudge_after_streak_and_saturates() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut bias = BiasController::new(BiasParams {
            nudge_trials: 2,
            nudge_max: 3,
            ..params(6)
        });
        assert_eq!(bias.check_nudge(true), None);

        bias.next_side(&mut rng, &history(6, 6, 0), ctx(12));
        let fired: Vec<Option<Side>> = (0..8).map(|_| bias.check_nudge(true)).collect();
        assert_eq!(
            fired,
            vec![None, Some(Side::Left), None, Some(Side::Left), None, None, None, None]
        );
        assert_eq!(bias.nudge_total(), -2);
        assert_eq!(bias.check_nudge(false), None);
    }
}
