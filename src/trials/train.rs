//! Stimulus train generation
//!
//! Each side's stimuli are a renewal process with exponential inter-arrival
//! times. The two mean rates split a fixed total rate by the trial's evidence
//! ratio, and every same-side gap is clipped up to the minimum ISI.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use super::types::{Side, StimulusEvent};
use crate::constants::{ISI_CHECK_DECIMALS, MAX_TRAIN_RESAMPLES};
use crate::error::{RigError, RigResult};

/// Session-wide generator parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainParams {
    /// Combined left+right rate (Hz)
    pub rate_sum: f64,
    /// Minimum same-side inter-stimulus interval (s)
    pub min_isi: f64,
    /// (lead, tail) padding added around the train in the STIM phase
    pub pad: (f64, f64),
}

/// A generated trial timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusTrain {
    /// Sorted by time, offsets from STIM onset
    pub events: Vec<StimulusEvent>,
    /// Underlying rates, indexed by side
    pub rates: [f64; 2],
    /// Train duration without padding
    pub duration: f64,
}

impl StimulusTrain {
    /// rate_right / rate_left
    pub fn ratio(&self) -> f64 {
        self.rates[1] / self.rates[0]
    }

    /// Intended stimulus counts, indexed by side.
    pub fn counts(&self) -> [usize; 2] {
        let mut counts = [0, 0];
        for ev in &self.events {
            counts[ev.side.index()] += 1;
        }
        counts
    }

    /// Side with more stimuli.
    pub fn majority(&self) -> Side {
        let [l, r] = self.counts();
        if r > l { Side::Right } else { Side::Left }
    }
}

fn check_positive(name: &str, v: f64) -> RigResult<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(RigError::Precondition(format!("{} must be finite and positive, got {}", name, v)))
    }
}

/// Split `rate_sum` so that rates[1] / rates[0] == ratio.
pub fn split_rates(rate_sum: f64, ratio: f64) -> RigResult<[f64; 2]> {
    check_positive("ratio", ratio)?;
    check_positive("rate_sum", rate_sum)?;
    let left = rate_sum / (ratio + 1.0);
    let rates = [left, rate_sum - left];
    for r in rates {
        check_positive("side rate", r)?;
    }
    Ok(rates)
}

fn inter_arrival(rate: f64) -> RigResult<Exp<f64>> {
    Exp::new(rate).map_err(|e| RigError::Precondition(format!("inter-arrival rate {}: {}", rate, e)))
}

/// Event times of one side, strictly before `end`.
fn renewal<R: Rng>(rng: &mut R, gaps: &Exp<f64>, end: f64, min_isi: f64) -> Vec<f64> {
    let mut times = Vec::new();
    let mut t = 0.0;
    loop {
        let gap = gaps.sample(rng).max(min_isi);
        if t + gap >= end {
            break;
        }
        t += gap;
        times.push(t);
    }
    times
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (v * scale).round() / scale
}

/// Generate the stimulus timeline for one trial.
///
/// `stereo` requests a synchronized bilateral pair at the start and/or end of
/// the train. The pair's order is flipped with probability 1/2; a flip swaps
/// one left and one right label, so side counts and the majority side are
/// unaffected. If the majority side differs from `side`, every label is
/// mirrored and the rates are swapped.
pub fn generate_train<R: Rng>(
    rng: &mut R,
    side: Side,
    ratio: f64,
    duration: f64,
    stereo: [bool; 2],
    params: &TrainParams,
) -> RigResult<StimulusTrain> {
    check_positive("duration", duration)?;
    if !(params.min_isi.is_finite() && params.min_isi >= 0.0) {
        return Err(RigError::Precondition(format!("min_isi must be non-negative, got {}", params.min_isi)));
    }
    let mut rates = split_rates(params.rate_sum, ratio)?;

    let end = if stereo[1] { duration - params.min_isi } else { duration };
    if end <= params.min_isi {
        return Err(RigError::Precondition(format!(
            "duration {} too short for min_isi {}",
            duration, params.min_isi
        )));
    }

    let gaps = [inter_arrival(rates[0])?, inter_arrival(rates[1])?];
    let mut attempts = 0;
    let (left, right) = loop {
        if attempts >= MAX_TRAIN_RESAMPLES {
            return Err(RigError::Precondition(format!(
                "no unequal-count train after {} attempts (ratio {}, duration {})",
                attempts, ratio, duration
            )));
        }
        attempts += 1;
        let left = renewal(rng, &gaps[0], end, params.min_isi);
        let right = renewal(rng, &gaps[1], end, params.min_isi);
        if left.len() != right.len() {
            break (left, right);
        }
    };

    let mut events: Vec<StimulusEvent> = Vec::with_capacity(left.len() + right.len() + 4);
    for (s, times) in [(Side::Left, &left), (Side::Right, &right)] {
        if stereo[0] {
            events.push(StimulusEvent { side: s, time: 0.0 });
        }
        events.extend(times.iter().map(|&time| StimulusEvent { side: s, time }));
        if stereo[1] {
            events.push(StimulusEvent { side: s, time: duration });
        }
    }
    events.sort_by(|a, b| a.time.total_cmp(&b.time));

    let n = events.len();
    if stereo[0] && rng.gen_bool(0.5) {
        events.swap(0, 1);
    }
    if stereo[1] && rng.gen_bool(0.5) {
        events.swap(n - 2, n - 1);
    }

    check_train(&events, duration, params.min_isi)?;

    if stereo[0] {
        for ev in events.iter_mut().skip(2) {
            ev.time += params.pad.0;
        }
    }

    let mut train = StimulusTrain {
        events,
        rates,
        duration,
    };
    if train.majority() != side {
        for ev in &mut train.events {
            ev.side = ev.side.opposite();
        }
        rates.swap(0, 1);
        train.rates = rates;
    }
    Ok(train)
}

/// All times within the train and every same-side gap at least `min_isi`.
fn check_train(events: &[StimulusEvent], duration: f64, min_isi: f64) -> RigResult<()> {
    if let Some(ev) = events.iter().find(|e| e.time > duration) {
        return Err(RigError::Invariant(format!(
            "stimulus at {} beyond train duration {}",
            ev.time, duration
        )));
    }
    for s in Side::BOTH {
        let times: Vec<f64> = events.iter().filter(|e| e.side == s).map(|e| e.time).collect();
        for w in times.windows(2) {
            let gap = round_to(w[1] - w[0], ISI_CHECK_DECIMALS);
            if gap < min_isi {
                return Err(RigError::Invariant(format!(
                    "{} gap {} below min_isi {}",
                    s, gap, min_isi
                )));
            }
        }
    }
    Ok(())
}
