//! Outcome resolution
//!
//! Decision table evaluated on entering END. Rows are tried top to bottom;
//! a state no row covers is an invariant violation and stops the session.
//!
//! | use_trials | any | side | earned | fault | then                                  |
//! |------------|-----|------|--------|-------|---------------------------------------|
//! | no         |     |      |        |       | LICK lick ? CORRECT : INCORRECT       |
//! | yes        | no  |      |        |       | any lick ? CORRECT : INCORRECT        |
//! | yes        | yes | no   |        |       | first LICK/REWARD lick side, or NULL  |
//! | yes        | yes | yes  | yes    | no    | CORRECT                               |
//! | yes        | yes | yes  | yes    | yes   | first LICK lick side, or NULL         |
//! | yes        | yes | yes  | no     |       | KILLED > EARLY_x > wrong LICK lick => INCORRECT > no LICK lick => NULL |

use super::licks::LickBuffer;
use super::phase::Phase;
use crate::error::{RigError, RigResult};
use crate::settings::Rule;
use crate::trials::{Outcome, Side};

/// Everything the table looks at.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeInputs<'a> {
    pub rule: Rule,
    /// Commanded side
    pub side: Side,
    pub use_trials: bool,
    /// The reward gate passed in REWARD (independent of `rewards_on`)
    pub earned: bool,
    pub killed: bool,
    /// Side of the lick that aborted STIM/DELAY
    pub early: Option<Side>,
    pub licks: &'a LickBuffer,
}

fn match_side(first: Option<Side>, side: Side) -> Outcome {
    match first {
        None => Outcome::Null,
        Some(s) if s == side => Outcome::Correct,
        Some(_) => Outcome::Incorrect,
    }
}

pub fn resolve_outcome(inp: &OutcomeInputs<'_>) -> RigResult<Outcome> {
    let licks = inp.licks;
    let rule = inp.rule;

    if !inp.use_trials {
        return Ok(if licks.any_in(Phase::Lick) {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        });
    }
    if !rule.any {
        return Ok(if licks.is_empty() {
            Outcome::Incorrect
        } else {
            Outcome::Correct
        });
    }
    if !rule.side {
        let first = licks.first_in(&[Phase::Lick, Phase::Reward]).map(|l| l.side);
        return Ok(match_side(first, inp.side));
    }

    if inp.earned {
        if !rule.fault {
            return Ok(Outcome::Correct);
        }
        let first = licks.first_in(&[Phase::Lick]).map(|l| l.side);
        return Ok(match_side(first, inp.side));
    }

    if inp.killed {
        Ok(Outcome::Killed)
    } else if let Some(side) = inp.early {
        Ok(Outcome::early(side))
    } else if licks.any_side_in(Phase::Lick, inp.side.opposite()) {
        Ok(Outcome::Incorrect)
    } else if !licks.any_in(Phase::Lick) {
        Ok(Outcome::Null)
    } else {
        Err(RigError::Invariant(format!(
            "no outcome for unrewarded trial with only correct-side ({}) LICK licks",
            inp.side
        )))
    }
}

/// Under strict rules a reward must have been earned exactly when the
/// LICK-phase licks were all on the correct side.
pub fn check_strict_reward(inp: &OutcomeInputs<'_>) -> RigResult<()> {
    let rule = inp.rule;
    let strict = rule.side && rule.phase && !rule.fault && inp.use_trials && inp.early.is_none() && !inp.killed;
    if !strict {
        return Ok(());
    }
    let correct = inp.licks.any_side_in(Phase::Lick, inp.side);
    let wrong = inp.licks.any_side_in(Phase::Lick, inp.side.opposite());
    let expected = correct && !wrong;
    if inp.earned != expected {
        return Err(RigError::Invariant(format!(
            "reward earned={} but LICK licks correct={} wrong={}",
            inp.earned, correct, wrong
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::LickEvent;
    use crate::settings::RuleId;

    fn buffer(licks: &[(Phase, Side)]) -> LickBuffer {
        let mut buf = LickBuffer::new();
        for (i, &(phase, side)) in licks.iter().enumerate() {
            buf.push(LickEvent {
                phase,
                ts: i as f64,
                side,
            });
        }
        buf
    }

    fn inputs(rule: RuleId, licks: &LickBuffer) -> OutcomeInputs<'_> {
        OutcomeInputs {
            rule: rule.rule(),
            side: Side::Left,
            use_trials: true,
            earned: false,
            killed: false,
            early: None,
            licks,
        }
    }

    #[test]
    fn test_without_trials_only_lick_phase_counts() {
        let buf = buffer(&[(Phase::Stim, Side::Left)]);
        let inp = OutcomeInputs {
            use_trials: false,
            ..inputs(RuleId::Full, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Incorrect);

        let buf = buffer(&[(Phase::Lick, Side::Right)]);
        let inp = OutcomeInputs {
            use_trials: false,
            ..inputs(RuleId::Full, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Correct);
    }

    #[test]
    fn test_passive_rule_any_lick() {
        let empty = LickBuffer::new();
        assert_eq!(resolve_outcome(&inputs(RuleId::Passive, &empty)).unwrap(), Outcome::Incorrect);
        let buf = buffer(&[(Phase::Iti, Side::Right)]);
        assert_eq!(resolve_outcome(&inputs(RuleId::Passive, &buf)).unwrap(), Outcome::Correct);
    }

    #[test]
    fn test_sideless_rule_uses_first_response_lick() {
        let mut rule = RuleId::Full.rule();
        rule.side = false;
        let buf = buffer(&[(Phase::Delay, Side::Right), (Phase::Reward, Side::Left), (Phase::Lick, Side::Right)]);
        let inp = OutcomeInputs {
            rule,
            ..inputs(RuleId::Full, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Correct);

        let empty = LickBuffer::new();
        let inp = OutcomeInputs {
            rule,
            ..inputs(RuleId::Full, &empty)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Null);
    }

    #[test]
    fn test_full_rule_rows() {
        let correct = buffer(&[(Phase::Lick, Side::Left)]);
        let earned = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Full, &correct)
        };
        assert_eq!(resolve_outcome(&earned).unwrap(), Outcome::Correct);

        let wrong = buffer(&[(Phase::Lick, Side::Right)]);
        assert_eq!(resolve_outcome(&inputs(RuleId::Full, &wrong)).unwrap(), Outcome::Incorrect);

        let none = buffer(&[(Phase::Iti, Side::Left)]);
        assert_eq!(resolve_outcome(&inputs(RuleId::Full, &none)).unwrap(), Outcome::Null);

        let early = buffer(&[(Phase::Stim, Side::Right)]);
        let inp = OutcomeInputs {
            early: Some(Side::Right),
            ..inputs(RuleId::Full, &early)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::EarlyRight);
    }

    #[test]
    fn test_killed_takes_precedence_unless_earned() {
        let buf = buffer(&[(Phase::Stim, Side::Left), (Phase::Lick, Side::Right)]);
        let killed = OutcomeInputs {
            killed: true,
            early: Some(Side::Left),
            ..inputs(RuleId::Full, &buf)
        };
        assert_eq!(resolve_outcome(&killed).unwrap(), Outcome::Killed);

        let correct = buffer(&[(Phase::Lick, Side::Left)]);
        let inp = OutcomeInputs {
            killed: true,
            earned: true,
            ..inputs(RuleId::Full, &correct)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Correct);
    }

    #[test]
    fn test_fault_rule_rows() {
        // Earned after a wrong first try
        let buf = buffer(&[(Phase::Lick, Side::Right), (Phase::Lick, Side::Left)]);
        let inp = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Fault, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Incorrect);

        let buf = buffer(&[(Phase::Lick, Side::Left), (Phase::Lick, Side::Right)]);
        let inp = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Fault, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Correct);

        // Earned but no LICK lick on record
        let buf = buffer(&[(Phase::Reward, Side::Left)]);
        let inp = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Fault, &buf)
        };
        assert_eq!(resolve_outcome(&inp).unwrap(), Outcome::Null);

        // Never licked in the response window
        let buf = buffer(&[(Phase::Reward, Side::Right)]);
        assert_eq!(resolve_outcome(&inputs(RuleId::Fault, &buf)).unwrap(), Outcome::Null);
    }

    #[test]
    fn test_unassigned_branch_is_invariant() {
        let buf = buffer(&[(Phase::Lick, Side::Left)]);
        let err = resolve_outcome(&inputs(RuleId::Full, &buf)).unwrap_err();
        assert!(matches!(err, RigError::Invariant(_)));
    }

    #[test]
    fn test_strict_reward_check() {
        let correct = buffer(&[(Phase::Lick, Side::Left)]);
        let ok = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Full, &correct)
        };
        assert!(check_strict_reward(&ok).is_ok());
        assert!(check_strict_reward(&inputs(RuleId::Full, &correct)).is_err());

        let both = buffer(&[(Phase::Lick, Side::Left), (Phase::Lick, Side::Right)]);
        let bad = OutcomeInputs {
            earned: true,
            ..inputs(RuleId::Full, &both)
        };
        assert!(check_strict_reward(&bad).is_err());
        assert!(check_strict_reward(&inputs(RuleId::Full, &both)).is_ok());

        // Relaxed rules are not checked
        assert!(check_strict_reward(&inputs(RuleId::Fault, &correct)).is_ok());
        let killed = OutcomeInputs {
            killed: true,
            ..inputs(RuleId::Full, &correct)
        };
        assert!(check_strict_reward(&killed).is_ok());
    }
}
