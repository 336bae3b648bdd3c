//! Rolling performance history

use serde::Serialize;

use super::types::{Outcome, Side, Trial};
use crate::constants::HISTORY_WINDOW;

/// Performance aggregates over a set of finished trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Fraction correct among valid trials
    pub perc: f64,
    /// Fraction of trials that were valid
    pub valid: f64,
    /// Per-side fraction correct (None = no valid trials on that side)
    pub perc_side: [Option<f64>; 2],
    /// Per-side validity (None = no trials on that side)
    pub valid_side: [Option<f64>; 2],
    pub outcome: Outcome,
    pub side: Side,
}

/// Running per-side counts behind a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    trials: [usize; 2],
    valid: [usize; 2],
    correct: [usize; 2],
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl Tally {
    fn of(trials: &[Trial]) -> Self {
        let mut tally = Self::default();
        for t in trials {
            tally.add(t);
        }
        tally
    }

    fn add(&mut self, trial: &Trial) {
        let s = trial.side.index();
        self.trials[s] += 1;
        self.valid[s] += usize::from(trial.is_valid());
        self.correct[s] += usize::from(trial.is_correct());
    }

    fn snapshot(&self, outcome: Outcome, side: Side) -> PerformanceSnapshot {
        let [trials, valid, correct] = [self.trials, self.valid, self.correct].map(|c| c[0] + c[1]);
        let (perc, valid_frac, perc_side, valid_side) = if valid == 0 {
            (0.0, 0.0, [Some(0.0); 2], [Some(0.0); 2])
        } else {
            (
                ratio(correct, valid).unwrap_or(0.0),
                ratio(valid, trials).unwrap_or(0.0),
                [0, 1].map(|s| ratio(self.correct[s], self.valid[s])),
                [0, 1].map(|s| ratio(self.valid[s], self.trials[s])),
            )
        };
        PerformanceSnapshot {
            perc,
            valid: valid_frac,
            perc_side,
            valid_side,
            outcome,
            side,
        }
    }
}

/// Summarize `trials`; None if empty or the last trial is unfinished.
pub fn summarize(trials: &[Trial]) -> Option<PerformanceSnapshot> {
    let last = trials.last()?;
    let outcome = last.outcome?;
    Some(Tally::of(trials).snapshot(outcome, last.side))
}

/// Global and windowed performance, refreshed once per finished trial.
///
/// The global aggregate is kept as running counts; the window is
/// re-summarized over its last `HISTORY_WINDOW` trials only.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    tally: Tally,
    /// Trials already folded into `tally`
    counted: usize,
    global: Option<PerformanceSnapshot>,
    windowed: Option<PerformanceSnapshot>,
}

impl HistoryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in trials finished since the last call. `trials` is the full
    /// session list, only ever appended to.
    pub fn update(&mut self, trials: &[Trial]) {
        let Some(last) = trials.last() else {
            return;
        };
        let Some(outcome) = last.outcome else {
            return;
        };
        for t in trials.iter().skip(self.counted) {
            self.tally.add(t);
        }
        self.counted = trials.len();
        self.global = Some(self.tally.snapshot(outcome, last.side));

        let from = trials.len().saturating_sub(HISTORY_WINDOW);
        self.windowed = summarize(&trials[from..]);
    }

    pub fn latest(&self) -> Option<&PerformanceSnapshot> {
        self.global.as_ref()
    }

    pub fn latest_windowed(&self) -> Option<&PerformanceSnapshot> {
        self.windowed.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::types::finished_trial;

    #[test]
    fn test_summary_per_side() {
        let trials = vec![
            finished_trial(0, Side::Left, Outcome::Correct, 0),
            finished_trial(1, Side::Left, Outcome::Incorrect, 0),
            finished_trial(2, Side::Right, Outcome::Correct, 0),
            finished_trial(3, Side::Right, Outcome::Null, 0),
        ];
        let s = summarize(&trials).unwrap();
        assert!((s.perc - 2.0 / 3.0).abs() < 1e-12);
        assert!((s.valid - 0.75).abs() < 1e-12);
        assert_eq!(s.perc_side, [Some(0.5), Some(1.0)]);
        assert_eq!(s.valid_side, [Some(1.0), Some(0.5)]);
        assert_eq!(s.outcome, Outcome::Null);
    }

    #[test]
    fn test_no_valid_trials_is_zero() {
        let trials = vec![finished_trial(0, Side::Left, Outcome::EarlyLeft, 0)];
        let s = summarize(&trials).unwrap();
        assert_eq!(s.perc, 0.0);
        assert_eq!(s.perc_side, [Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_window_limited_to_recent_trials() {
        let mut trials = Vec::new();
        let mut history = HistoryWindow::new();
        for i in 0..30 {
            let outcome = if i < 15 { Outcome::Incorrect } else { Outcome::Correct };
            trials.push(finished_trial(i, Side::by_parity(i), outcome, 0));
            history.update(&trials);
            if i == 0 {
                // One side missing from the window
                assert_eq!(history.latest_windowed().unwrap().perc_side[1], None);
            }
        }
        assert_eq!(history.counted, 30);
        assert_eq!(history.latest_windowed().unwrap().perc, 1.0);
        assert!((history.latest().unwrap().perc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_running_totals_match_full_summary() {
        let outcomes = [
            Outcome::Correct,
            Outcome::Null,
            Outcome::Incorrect,
            Outcome::EarlyRight,
            Outcome::Correct,
            Outcome::Killed,
        ];
        let mut trials = Vec::new();
        let mut history = HistoryWindow::new();
        for i in 0..60 {
            let side = if i % 3 == 0 { Side::Right } else { Side::Left };
            trials.push(finished_trial(i, side, outcomes[i % outcomes.len()], 0));
            history.update(&trials);
            assert_eq!(history.latest(), summarize(&trials).as_ref());
        }
    }

    #[test]
    fn test_unfinished_trial_ignored() {
        let mut trials = vec![finished_trial(0, Side::Left, Outcome::Correct, 0)];
        let mut history = HistoryWindow::new();
        history.update(&trials);
        let mut open = finished_trial(1, Side::Right, Outcome::Correct, 0);
        open.outcome = None;
        trials.push(open);
        history.update(&trials);
        assert_eq!(history.counted, 1);
        assert_eq!(history.latest().unwrap().side, Side::Left);
    }
}
