//! Level progression
//!
//! Tracks the current level, the destination level of an intro ladder and the
//! manual lock, and decides after each trial whether the subject advances.

use tracing::info;

use super::types::{Side, Trial};
use crate::settings::{Criteria, Level, LevelTable};

/// Mutable progression state over an immutable [`LevelTable`].
#[derive(Debug, Clone)]
pub struct LevelState {
    table: LevelTable,
    level: usize,
    destination: usize,
    intro_step: Option<usize>,
    locked: bool,
    /// Stored trials of the level the previous session ended on
    past: Vec<Trial>,
}

fn mean(values: impl Iterator<Item = bool>) -> Option<f64> {
    let (n, hits) = values.fold((0usize, 0usize), |(n, h), v| (n + 1, h + usize::from(v)));
    (n > 0).then(|| hits as f64 / n as f64)
}

/// Last `n` items of `items`.
fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

impl LevelState {
    /// Choose the starting level: explicit `start_level`, else the level the
    /// last stored trial was run at (clamped into the table), else 0. If that
    /// level has an intro ladder, the session starts on its first step.
    pub fn new(table: LevelTable, start_level: Option<usize>, past: Vec<Trial>) -> Self {
        let destination = match (start_level, past.last()) {
            (Some(level), _) => {
                info!("Manual destination level selection: {}", level);
                level.min(table.last_index())
            }
            (None, Some(last)) => {
                let level = last.level.min(table.last_index());
                info!("Last detected level: {}", level);
                level
            }
            (None, None) => 0,
        };
        info!("Destination level: {}", destination);

        let mut state = Self {
            table,
            level: destination,
            destination,
            intro_step: None,
            locked: false,
            past,
        };
        if let Some(step) = state.table.get(destination).intro.first() {
            info!("Starting on level: {}", step.level);
            state.level = step.level;
            state.intro_step = Some(0);
        }
        state
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn current(&self) -> &Level {
        self.table.get(self.level)
    }

    pub fn destination(&self) -> usize {
        self.destination
    }

    pub fn intro_step(&self) -> Option<usize> {
        self.intro_step
    }

    pub fn in_intro(&self) -> bool {
        self.intro_step.is_some()
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        info!("Level {}", if locked { "locked" } else { "unlocked" });
    }

    pub fn table(&self) -> &LevelTable {
        &self.table
    }

    /// Manually move `inc` levels, clamped into the table. Ends any intro.
    pub fn change_level(&mut self, inc: i64) {
        if self.locked {
            info!("Level locked, no adjustment made.");
            return;
        }
        let target = (self.level as i64 + inc).clamp(0, self.table.last_index() as i64);
        self.level = target as usize;
        info!("Manually changed to level {}.", self.level);
        if self.intro_step.take().is_some() {
            info!("Intro progression no longer applies.");
        }
    }

    /// Criteria in force: the intro step's transient criteria or the level's.
    fn criteria(&self) -> Criteria {
        match self.intro_step {
            Some(step) => {
                let count = self
                    .table
                    .get(self.destination)
                    .intro
                    .get(step)
                    .map(|s| s.count)
                    .unwrap_or(0);
                Criteria::intro(count)
            }
            None => self.current().criteria,
        }
    }

    /// Re-evaluate advancement against the finished `trials` of this
    /// session. Returns true if the level changed.
    pub fn update(&mut self, trials: &[Trial]) -> bool {
        if self.locked {
            return false;
        }
        if self.intro_step.is_none() && self.level >= self.table.last_index() {
            return false;
        }

        let level = self.level;
        let cri = self.criteria();

        let mut valid_at_level: usize = trials.iter().filter(|t| t.level == level && t.is_valid()).count();
        if self.intro_step.is_none() && self.past.last().is_some_and(|t| t.level == level) {
            valid_at_level += self.past.iter().filter(|t| t.is_valid()).count();
        }

        let run_from = trials
            .iter()
            .rposition(|t| t.level != level)
            .map(|i| i + 1)
            .unwrap_or(0);
        let contig = &trials[run_from..];
        let contig_valid: Vec<&Trial> = contig.iter().filter(|t| t.is_valid()).collect();

        if valid_at_level < cri.n || contig_valid.len() < cri.win {
            return false;
        }

        let win_all = tail(contig, cri.win);
        let win_valid = tail(&contig_valid, cri.win);

        let perc = mean(win_valid.iter().map(|t| t.is_correct())).unwrap_or(1.0);
        if perc < cri.perc {
            return false;
        }

        // Bias is skipped when a side is absent from the window
        let side_perc = Side::BOTH.map(|s| mean(win_valid.iter().filter(|t| t.side == s).map(|t| t.is_correct())));
        if let [Some(l), Some(r)] = side_perc
            && l + r > 0.0
            && l.max(r) / (l + r) > cri.bias
        {
            return false;
        }

        let valid = mean(win_all.iter().map(Trial::is_valid)).unwrap_or(1.0);
        if valid < cri.valid {
            return false;
        }

        self.advance();
        true
    }

    fn advance(&mut self) {
        let Some(step) = self.intro_step else {
            self.level += 1;
            info!("Auto-advanced to level {}.", self.level);
            return;
        };
        let ladder = &self.table.get(self.destination).intro;
        let next = step + 1;
        match ladder.get(next) {
            Some(s) => {
                self.intro_step = Some(next);
                self.level = s.level;
                info!("Auto-advanced to intro part {}: level {}.", next, s.level);
            }
            None => {
                self.intro_step = None;
                self.level = self.destination;
                info!("Graduated from intro to level {}.", self.destination);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::types::{Outcome, finished_trial};

    /// Append `n` trials at the state's current level.
    fn run(state: &mut LevelState, trials: &mut Vec<Trial>, n: usize, outcome: Outcome) -> usize {
        let mut changes = 0;
        for _ in 0..n {
            let idx = trials.len();
            trials.push(finished_trial(idx, Side::by_parity(idx), outcome, state.level()));
            if state.update(trials) {
                changes += 1;
            }
        }
        changes
    }

    #[test]
    fn test_free_rewards_advance_after_fifteen() {
        let mut state = LevelState::new(LevelTable::standard(), None, Vec::new());
        assert_eq!(state.level(), 0);
        assert!(!state.in_intro());

        let mut trials = Vec::new();
        run(&mut state, &mut trials, 14, Outcome::Correct);
        assert_eq!(state.level(), 0);
        run(&mut state, &mut trials, 1, Outcome::Correct);
        assert_eq!(state.level(), 1);
    }

    #[test]
    fn test_invalid_trials_hold_level() {
        let mut state = LevelState::new(LevelTable::standard(), None, Vec::new());
        let mut trials = Vec::new();
        run(&mut state, &mut trials, 40, Outcome::Null);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_locked_never_changes() {
        let mut state = LevelState::new(LevelTable::standard(), None, Vec::new());
        state.set_locked(true);
        let mut trials = Vec::new();
        assert_eq!(run(&mut state, &mut trials, 50, Outcome::Correct), 0);
        state.change_level(3);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_intro_ladder_graduates() {
        let mut state = LevelState::new(LevelTable::standard(), Some(4), Vec::new());
        assert_eq!(state.destination(), 4);
        assert_eq!((state.level(), state.intro_step()), (2, Some(0)));

        let mut trials = Vec::new();
        run(&mut state, &mut trials, 15, Outcome::Incorrect);
        // Intro criteria ignore accuracy
        assert_eq!((state.level(), state.intro_step()), (3, Some(1)));

        run(&mut state, &mut trials, 15, Outcome::Correct);
        assert_eq!((state.level(), state.intro_step()), (4, None));
    }

    #[test]
    fn test_resume_from_past_level() {
        let past: Vec<Trial> = (0..3).map(|i| finished_trial(i, Side::Left, Outcome::Correct, 12)).collect();
        let state = LevelState::new(LevelTable::standard(), None, past);
        // Clamped to the last level, which starts on its intro ladder
        assert_eq!(state.destination(), 8);
        assert_eq!((state.level(), state.intro_step()), (4, Some(0)));
    }

    #[test]
    fn test_past_trials_count_toward_n() {
        let mut base = LevelTable::standard().get(0).clone();
        base.criteria = Criteria {
            n: 20,
            win: 5,
            perc: 0.5,
            bias: 1.0,
            valid: 0.5,
        };
        let table = LevelTable::new(vec![base.clone(), base]).unwrap();

        let past: Vec<Trial> = (0..15).map(|i| finished_trial(i, Side::by_parity(i), Outcome::Correct, 0)).collect();
        let mut with_past = LevelState::new(table.clone(), None, past);
        let mut without = LevelState::new(table, None, Vec::new());

        let mut a = Vec::new();
        let mut b = Vec::new();
        run(&mut with_past, &mut a, 5, Outcome::Correct);
        run(&mut without, &mut b, 5, Outcome::Correct);
        assert_eq!(with_past.level(), 1);
        assert_eq!(without.level(), 0);
    }

    #[test]
    fn test_bias_criterion_blocks() {
        let mut base = LevelTable::standard().get(0).clone();
        base.criteria = Criteria {
            n: 4,
            win: 4,
            perc: 0.0,
            bias: 0.6,
            valid: 0.0,
        };
        let table = LevelTable::new(vec![base.clone(), base]).unwrap();
        let mut state = LevelState::new(table, None, Vec::new());

        // Left always correct, right always wrong: normalized bias 1.0
        let trials: Vec<Trial> = (0..8)
            .map(|i| {
                let side = Side::by_parity(i);
                let outcome = if side == Side::Left { Outcome::Correct } else { Outcome::Incorrect };
                finished_trial(i, side, outcome, 0)
            })
            .collect();
        assert!(!state.update(&trials));
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_change_level_clamps_and_ends_intro() {
        let mut state = LevelState::new(LevelTable::standard(), Some(5), Vec::new());
        assert!(state.in_intro());
        state.change_level(100);
        assert_eq!(state.level(), 8);
        assert!(!state.in_intro());
        state.change_level(-100);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_last_level_is_terminal() {
        let mut state = LevelState::new(LevelTable::standard(), Some(0), Vec::new());
        state.change_level(8);
        let mut trials = Vec::new();
        assert_eq!(run(&mut state, &mut trials, 600, Outcome::Correct), 0);
        assert_eq!(state.level(), 8);
    }
}
