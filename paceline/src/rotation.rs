// Rotation scheduling and per-rider power metrics.
//
// One full rotation has as many slots as riders. Slot j lasts as long as
// rider j's pull, and during slot j rider k sits at pack position
// (k + n - j - 1) % n + 1. Positions deeper than the wattage table clamp to
// its last row: riders far back gain no further shelter.

use crate::drag::PACK_POSITIONS;
use crate::{PacingStrategy, PlanError};

/// Pack position occupied by `rider` during `slot`, both zero-based, in a
/// roster of `n`. Returns a 1-based position.
pub fn position_during_slot(rider: usize, slot: usize, n: usize) -> usize {
    (rider + n - slot - 1) % n + 1
}

/// Wattage rider `rider` faces during `slot`, given the per-position demands
/// for positions 1..=4.
fn slot_watts(rider: usize, slot: usize, n: usize, position_watts: &[f64; PACK_POSITIONS]) -> f64 {
    let position = position_during_slot(rider, slot, n).min(PACK_POSITIONS);
    position_watts[position - 1]
}

/// Longest pull rider `rider` can sustain: zero when their power ceiling
/// cannot hold leader wattage, otherwise the configured per-pull maximum.
/// An empty ceiling vector means nobody is capacity-limited.
pub fn pull_capacity(
    rider: usize,
    leader_watts: f64,
    ceilings_w: &[f64],
    max_pull_s: f64,
) -> f64 {
    match ceilings_w.get(rider) {
        Some(&ceiling) if ceiling < leader_watts => 0.0,
        _ => max_pull_s,
    }
}

/// Per-rider pull durations for every strategy except `BalancedIntensity`,
/// which the engine refines iteratively from the `IdenticalPull` start point
/// this function returns.
pub fn assign_pull_durations(
    strategy: PacingStrategy,
    roster_size: usize,
    rotation_period_s: f64,
    leader_watts: f64,
    ceilings_w: &[f64],
    max_pull_s: f64,
) -> Result<Vec<f64>, PlanError> {
    if roster_size == 0 {
        return Err(PlanError::EmptyRoster);
    }
    let n = roster_size;
    let durations = match strategy {
        PacingStrategy::ThirtySecPull => vec![30.0; n],
        PacingStrategy::IdenticalPull | PacingStrategy::BalancedIntensity => {
            vec![rotation_period_s / n as f64; n]
        }
        PacingStrategy::EverybodyPullHard => (0..n)
            .map(|rider| pull_capacity(rider, leader_watts, ceilings_w, max_pull_s))
            .collect(),
        PacingStrategy::Fastest => {
            let pullers: Vec<usize> = (0..n)
                .filter(|&rider| pull_capacity(rider, leader_watts, ceilings_w, max_pull_s) > 0.0)
                .collect();
            let mut durations = vec![0.0; n];
            if !pullers.is_empty() {
                let share = rotation_period_s / pullers.len() as f64;
                for rider in pullers {
                    durations[rider] = share;
                }
            }
            durations
        }
        PacingStrategy::LastFive | PacingStrategy::LastFour => {
            let tail = match strategy {
                PacingStrategy::LastFive => 5,
                _ => 4,
            };
            let pullers = tail.min(n);
            let share = rotation_period_s / pullers as f64;
            let mut durations = vec![0.0; n];
            for rider in n - pullers..n {
                durations[rider] = share;
            }
            durations
        }
    };
    Ok(durations)
}

/// Duration-weighted mean wattage across the rider's full rotation. Zero
/// total duration yields zero.
pub fn average_watts(
    rider: usize,
    pull_durations: &[f64],
    position_watts: &[f64; PACK_POSITIONS],
) -> f64 {
    let n = pull_durations.len();
    let total: f64 = pull_durations.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let joules: f64 = (0..n)
        .map(|slot| slot_watts(rider, slot, n, position_watts) * pull_durations[slot])
        .sum();
    joules / total
}

/// Duration-weighted 4th-power mean wattage, 4th-rooted. Weights the leading
/// interval's disproportionate physiological cost more than a plain average,
/// so it never falls below `average_watts`.
pub fn normalized_watts(
    rider: usize,
    pull_durations: &[f64],
    position_watts: &[f64; PACK_POSITIONS],
) -> f64 {
    let n = pull_durations.len();
    let total: f64 = pull_durations.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let fourth_mean: f64 = (0..n)
        .map(|slot| slot_watts(rider, slot, n, position_watts).powi(4) * pull_durations[slot])
        .sum::<f64>()
        / total;
    fourth_mean.powf(0.25)
}

/// Outcome of the balanced-intensity search.
pub struct Balanced {
    pub pull_durations: Vec<f64>,
    pub converged: bool,
}

/// Iteratively rebalance pull durations until every capacity-bearing rider's
/// normalized watts sits within `tolerance` of their group mean, or the
/// iteration budget runs out. The best iterate seen is returned either way.
pub fn balance_pull_durations(
    roster_size: usize,
    rotation_period_s: f64,
    position_watts: &[f64; PACK_POSITIONS],
    leader_watts: f64,
    ceilings_w: &[f64],
    max_pull_s: f64,
    tolerance: f64,
    max_iters: usize,
) -> Result<Balanced, PlanError> {
    let n = roster_size;
    let mut durations = assign_pull_durations(
        PacingStrategy::IdenticalPull,
        n,
        rotation_period_s,
        leader_watts,
        ceilings_w,
        max_pull_s,
    )?;
    let capacities: Vec<f64> = (0..n)
        .map(|rider| pull_capacity(rider, leader_watts, ceilings_w, max_pull_s))
        .collect();

    let mut best = durations.clone();
    let mut best_spread = f64::INFINITY;

    for _ in 0..max_iters {
        clamp_and_renormalize(&mut durations, &capacities, rotation_period_s);

        let np: Vec<f64> = (0..n)
            .map(|rider| normalized_watts(rider, &durations, position_watts))
            .collect();
        let active: Vec<usize> = (0..n).filter(|&r| capacities[r] > 0.0).collect();
        if active.is_empty() {
            return Ok(Balanced {
                pull_durations: durations,
                converged: true,
            });
        }
        let mean = active.iter().map(|&r| np[r]).sum::<f64>() / active.len() as f64;
        let max = active.iter().map(|&r| np[r]).fold(f64::MIN, f64::max);
        let min = active.iter().map(|&r| np[r]).fold(f64::MAX, f64::min);
        let spread = if mean > 0.0 { (max - min) / mean } else { 0.0 };

        if spread < best_spread {
            best_spread = spread;
            best = durations.clone();
        }
        if spread <= tolerance {
            return Ok(Balanced {
                pull_durations: best,
                converged: true,
            });
        }

        // Nudge each active rider's pull by the inverse of their deviation
        // from the mean: hot riders shorten, cool riders lengthen.
        for &rider in &active {
            if np[rider] > 0.0 {
                durations[rider] *= mean / np[rider];
            }
        }
    }

    Ok(Balanced {
        pull_durations: best,
        converged: false,
    })
}

fn clamp_and_renormalize(durations: &mut [f64], capacities: &[f64], rotation_period_s: f64) {
    for (duration, &capacity) in durations.iter_mut().zip(capacities) {
        *duration = duration.clamp(0.0, capacity);
    }
    let total: f64 = durations.iter().sum();
    if total > 0.0 {
        let scale = rotation_period_s / total;
        for duration in durations.iter_mut() {
            *duration *= scale;
        }
    }
}
