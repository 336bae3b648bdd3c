//! Session summary generation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::RigResult;
use crate::events::LoggerReport;
use crate::trials::{HistoryWindow, Outcome, Trial};

/// Session summary for JSON output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub subject: String,
    pub trials: usize,
    /// Count per outcome name
    pub outcomes: BTreeMap<String, usize>,
    pub rewards: usize,
    pub start_level: usize,
    pub final_level: usize,
    /// Correct among valid trials (None with no valid trials)
    pub percent_correct: Option<f64>,
    /// Per-side correct among valid trials, [left, right]
    pub percent_side: [Option<f64>; 2],
    /// Fraction correct over the most recent performance window
    pub recent_percent_correct: Option<f64>,
    /// Fraction of valid trials over the most recent performance window
    pub recent_valid: Option<f64>,
    pub duration_secs: f64,
    pub rows_written: usize,
    pub crash_dumps: usize,
}

impl SessionSummary {
    pub fn from_trials(
        session_id: &str,
        subject: &str,
        trials: &[Trial],
        final_level: usize,
        duration_secs: f64,
        report: &LoggerReport,
    ) -> Self {
        let mut outcomes = BTreeMap::new();
        for t in trials {
            if let Some(o) = t.outcome {
                *outcomes.entry(o.name().to_string()).or_insert(0) += 1;
            }
        }
        let valid = trials.iter().filter(|t| t.is_valid()).count();
        let correct = trials.iter().filter(|t| t.outcome == Some(Outcome::Correct)).count();
        let percent_correct = (valid > 0).then(|| correct as f64 / valid as f64);

        Self {
            session_id: session_id.to_string(),
            subject: subject.to_string(),
            trials: trials.len(),
            outcomes,
            rewards: trials.iter().filter(|t| t.reward).count(),
            start_level: trials.first().map(|t| t.level).unwrap_or(final_level),
            final_level,
            percent_correct,
            percent_side: [None; 2],
            recent_percent_correct: None,
            recent_valid: None,
            duration_secs,
            rows_written: report.total_written(),
            crash_dumps: report.crash_dumps.len(),
        }
    }

    /// Fill in per-side and recent-window figures from the handler's history.
    pub fn with_history(mut self, history: &HistoryWindow) -> Self {
        if let Some(global) = history.latest() {
            self.percent_side = global.perc_side;
        }
        if let Some(recent) = history.latest_windowed() {
            self.recent_percent_correct = Some(recent.perc);
            self.recent_valid = Some(recent.valid);
        }
        self
    }

    /// Write summary to JSON file
    pub fn write_to_file(&self, path: &Path) -> RigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Print summary to console
    pub fn print(&self) {
        println!("\n========================================");
        println!("          SESSION COMPLETE");
        println!("========================================");
        println!("Subject:  {}", self.subject);
        println!("Session:  {}", self.session_id);
        println!("Trials:   {}", self.trials);
        println!("Rewards:  {}", self.rewards);
        println!("Level:    {} -> {}", self.start_level, self.final_level);
        match self.percent_correct {
            Some(p) => println!("Correct:  {:.1}%", p * 100.0),
            None => println!("Correct:  -"),
        }
        if let (Some(p), Some(v)) = (self.recent_percent_correct, self.recent_valid) {
            println!("Recent:   {:.1}% correct, {:.1}% valid", p * 100.0, v * 100.0);
        }
        for (name, n) in &self.outcomes {
            println!("  {:<12} {}", name, n);
        }
        println!("Duration: {:.1}s", self.duration_secs);
        if self.crash_dumps > 0 {
            println!("WARNING: {} crash dump(s) written", self.crash_dumps);
        }
        println!("========================================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::{Side, finished_trial};

    #[test]
    fn test_summary_counts() {
        let trials = vec![
            finished_trial(0, Side::Left, Outcome::Correct, 2),
            finished_trial(1, Side::Right, Outcome::Incorrect, 2),
            finished_trial(2, Side::Left, Outcome::Null, 3),
            finished_trial(3, Side::Right, Outcome::Correct, 3),
        ];
        let summary = SessionSummary::from_trials("s1", "m1", &trials, 3, 42.0, &LoggerReport::default());
        assert_eq!(summary.trials, 4);
        assert_eq!(summary.outcomes[Outcome::Correct.name()], 2);
        assert_eq!(summary.outcomes[Outcome::Null.name()], 1);
        assert_eq!(summary.start_level, 2);
        assert_eq!(summary.final_level, 3);
        let p = summary.percent_correct.unwrap();
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_recent_window_from_history() {
        let trials: Vec<Trial> = (0..20)
            .map(|i| {
                let outcome = if i < 10 { Outcome::Null } else { Outcome::Correct };
                finished_trial(i, Side::by_parity(i), outcome, 1)
            })
            .collect();
        let mut history = HistoryWindow::new();
        history.update(&trials);

        let summary = SessionSummary::from_trials("s1", "m1", &trials, 1, 10.0, &LoggerReport::default())
            .with_history(&history);
        assert_eq!(summary.percent_correct, Some(1.0));
        assert_eq!(summary.recent_percent_correct, Some(1.0));
        assert_eq!(summary.percent_side, [Some(1.0), Some(1.0)]);
        // Last 15 trials: 10 correct, 5 null
        let valid = summary.recent_valid.unwrap();
        assert!((valid - 10.0 / 15.0).abs() < 1e-12);

        let empty = SessionSummary::from_trials("s1", "m1", &[], 0, 0.0, &LoggerReport::default())
            .with_history(&HistoryWindow::new());
        assert_eq!(empty.recent_percent_correct, None);
        assert_eq!(empty.percent_side, [None, None]);
    }

    #[test]
    fn test_empty_session() {
        let summary = SessionSummary::from_trials("s1", "m1", &[], 4, 0.0, &LoggerReport::default());
        assert_eq!(summary.percent_correct, None);
        assert_eq!(summary.start_level, 4);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = SessionSummary::from_trials("s1", "m1", &[], 0, 1.0, &LoggerReport::default());
        summary.write_to_file(&path).unwrap();
        let back: SessionSummary = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, summary);
    }
}
