//! Pull-plan computation for riders rotating through a paceline.
//!
//! Given a target group speed and a pacing strategy, the engine derives the
//! wattage each pack position demands at that speed from an empirical
//! speed/power table, assigns each rider a pull duration, and reports the
//! average and normalized power of every rider's duty cycle over one full
//! rotation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod drag;
pub mod rotation;

pub use drag::{Interpolated, WattageTable, PACK_POSITIONS, SPEED_TIERS};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("pack position {0} is outside 1..=4")]
    InvalidPosition(usize),
    #[error("unknown pacing strategy: {0}")]
    UnknownStrategy(String),
    #[error("roster is empty")]
    EmptyRoster,
    #[error("invalid plan request: {0}")]
    InvalidPlanRequest(String),
    #[error("invalid wattage table: {0}")]
    InvalidTable(String),
}

/// The closed set of supported pacing strategies.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacingStrategy {
    ThirtySecPull,
    IdenticalPull,
    BalancedIntensity,
    EverybodyPullHard,
    Fastest,
    LastFive,
    LastFour,
}

impl Default for PacingStrategy {
    fn default() -> Self {
        PacingStrategy::IdenticalPull
    }
}

impl PacingStrategy {
    pub const ALL: [PacingStrategy; 7] = [
        PacingStrategy::ThirtySecPull,
        PacingStrategy::IdenticalPull,
        PacingStrategy::BalancedIntensity,
        PacingStrategy::EverybodyPullHard,
        PacingStrategy::Fastest,
        PacingStrategy::LastFive,
        PacingStrategy::LastFour,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PacingStrategy::ThirtySecPull => "thirty_sec_pull",
            PacingStrategy::IdenticalPull => "identical_pull",
            PacingStrategy::BalancedIntensity => "balanced_intensity",
            PacingStrategy::EverybodyPullHard => "everybody_pull_hard",
            PacingStrategy::Fastest => "fastest",
            PacingStrategy::LastFive => "last_five",
            PacingStrategy::LastFour => "last_four",
        }
    }
}

impl fmt::Display for PacingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PacingStrategy {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| PlanError::UnknownStrategy(s.to_string()))
    }
}

/// Parameters of one plan request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanParams {
    pub strategy: PacingStrategy,
    pub roster_size: usize,
    pub target_speed_kph: f64,
    pub rotation_period_s: f64,
    /// Optional per-rider leader-wattage ceilings, rotation order. Empty
    /// means no rider is capacity-limited.
    pub rider_ceilings_w: Vec<f64>,
    /// Hard cap on a single pull.
    pub max_pull_s: f64,
    /// Relative normalized-watts spread accepted by `BalancedIntensity`.
    pub balance_tolerance: f64,
    /// Iteration budget for the `BalancedIntensity` search.
    pub balance_max_iters: usize,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            strategy: PacingStrategy::IdenticalPull,
            roster_size: 4,
            target_speed_kph: 42.0,
            rotation_period_s: 240.0,
            rider_ceilings_w: Vec::new(),
            max_pull_s: 120.0,
            balance_tolerance: 0.01,
            balance_max_iters: 20,
        }
    }
}

/// One rider's assignment in a computed plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullPlanItem {
    pub speed_kph: f64,
    pub p1_duration: f64,
    pub p1_w: f64,
    pub p2_w: f64,
    pub p3_w: f64,
    pub p4_w: f64,
    pub average_watts: f64,
    pub normalized_watts: f64,
    pub diagnostic_message: String,
}

/// Compute one pull-plan item per rider, in rotation order.
///
/// Validation failures are atomic: no items are produced. Non-fatal
/// anomalies (extrapolated wattages, pulls forced to zero, balanced-intensity
/// non-convergence) land in each affected item's `diagnostic_message`.
pub fn compute_plan(
    params: &PlanParams,
    table: &WattageTable,
) -> Result<Vec<PullPlanItem>, PlanError> {
    if params.roster_size == 0 {
        return Err(PlanError::EmptyRoster);
    }
    if params.target_speed_kph <= 0.0 {
        return Err(PlanError::InvalidPlanRequest(format!(
            "target speed must be positive, got {} km/h",
            params.target_speed_kph
        )));
    }
    if params.rotation_period_s <= 0.0 {
        return Err(PlanError::InvalidPlanRequest(format!(
            "rotation period must be positive, got {} s",
            params.rotation_period_s
        )));
    }

    let mut position_watts = [0.0; PACK_POSITIONS];
    let mut extrapolated = false;
    for position in 1..=PACK_POSITIONS {
        let demand = table.wattage_for(position, params.target_speed_kph)?;
        position_watts[position - 1] = demand.watts;
        extrapolated |= demand.extrapolated;
    }
    let leader_watts = position_watts[0];

    let mut converged = true;
    let pull_durations = match params.strategy {
        PacingStrategy::BalancedIntensity => {
            let balanced = rotation::balance_pull_durations(
                params.roster_size,
                params.rotation_period_s,
                &position_watts,
                leader_watts,
                &params.rider_ceilings_w,
                params.max_pull_s,
                params.balance_tolerance,
                params.balance_max_iters,
            )?;
            converged = balanced.converged;
            balanced.pull_durations
        }
        strategy => rotation::assign_pull_durations(
            strategy,
            params.roster_size,
            params.rotation_period_s,
            leader_watts,
            &params.rider_ceilings_w,
            params.max_pull_s,
        )?,
    };

    let items = (0..params.roster_size)
        .map(|rider| {
            let mut notes = Vec::new();
            if extrapolated {
                notes.push(format!(
                    "speed {} km/h is outside the tabulated tiers; wattages extrapolated",
                    params.target_speed_kph
                ));
            }
            if pull_durations[rider] == 0.0 {
                notes.push("pull forced to zero by strategy rule".to_string());
            }
            if !converged {
                notes.push(format!(
                    "balanced intensity did not converge within {} iterations",
                    params.balance_max_iters
                ));
            }
            PullPlanItem {
                speed_kph: params.target_speed_kph,
                p1_duration: pull_durations[rider],
                p1_w: position_watts[0],
                p2_w: position_watts[1],
                p3_w: position_watts[2],
                p4_w: position_watts[3],
                average_watts: rotation::average_watts(rider, &pull_durations, &position_watts),
                normalized_watts: rotation::normalized_watts(
                    rider,
                    &pull_durations,
                    &position_watts,
                ),
                diagnostic_message: notes.join("; "),
            }
        })
        .collect();

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(strategy: PacingStrategy) -> PlanParams {
        PlanParams {
            strategy,
            ..PlanParams::default()
        }
    }

    #[test]
    fn identical_pull_divides_the_rotation_period() {
        let table = WattageTable::zwift_insider();
        let items = compute_plan(&params(PacingStrategy::IdenticalPull), &table).unwrap();
        assert_eq!(items.len(), 4);
        for item in &items {
            assert!((item.p1_duration - 60.0).abs() < 1e-9);
            assert!(item.diagnostic_message.is_empty());
        }
    }

    #[test]
    fn thirty_sec_pull_fixes_every_pull_at_thirty() {
        let table = WattageTable::zwift_insider();
        let request = PlanParams {
            roster_size: 3,
            ..params(PacingStrategy::ThirtySecPull)
        };
        let items = compute_plan(&request, &table).unwrap();
        assert_eq!(items.len(), 3);
        let total: f64 = items.iter().map(|item| item.p1_duration).sum();
        for item in &items {
            assert_eq!(item.p1_duration, 30.0);
        }
        assert!((total - 90.0).abs() < 1e-9);
    }

    #[test]
    fn wattages_are_non_increasing_down_the_line() {
        let table = WattageTable::zwift_insider();
        let items = compute_plan(&params(PacingStrategy::IdenticalPull), &table).unwrap();
        for item in &items {
            assert!(item.p1_w >= item.p2_w);
            assert!(item.p2_w >= item.p3_w);
            assert!(item.p3_w >= item.p4_w);
        }
    }

    #[test]
    fn normalized_watts_never_understate_average() {
        let table = WattageTable::zwift_insider();
        for strategy in PacingStrategy::ALL {
            let items = compute_plan(&params(strategy), &table).unwrap();
            for item in &items {
                assert!(
                    item.normalized_watts >= item.average_watts,
                    "{strategy}: np {} < avg {}",
                    item.normalized_watts,
                    item.average_watts
                );
            }
        }
    }

    #[test]
    fn balanced_intensity_converges_or_flags() {
        let table = WattageTable::zwift_insider();
        let items = compute_plan(&params(PacingStrategy::BalancedIntensity), &table).unwrap();
        let np: Vec<f64> = items.iter().map(|item| item.normalized_watts).collect();
        let mean = np.iter().sum::<f64>() / np.len() as f64;
        let spread = np.iter().cloned().fold(f64::MIN, f64::max)
            - np.iter().cloned().fold(f64::MAX, f64::min);
        let flagged = items
            .iter()
            .any(|item| item.diagnostic_message.contains("did not converge"));
        assert!(spread <= 0.01 * mean || flagged);
    }

    #[test]
    fn last_four_drafts_the_front_of_a_big_roster() {
        let table = WattageTable::zwift_insider();
        let request = PlanParams {
            roster_size: 6,
            ..params(PacingStrategy::LastFour)
        };
        let items = compute_plan(&request, &table).unwrap();
        for item in &items[..2] {
            assert_eq!(item.p1_duration, 0.0);
            assert!(item.diagnostic_message.contains("pull forced to zero"));
        }
        for item in &items[2..] {
            assert!((item.p1_duration - 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn fastest_drops_capacity_limited_riders() {
        let table = WattageTable::zwift_insider();
        let request = PlanParams {
            target_speed_kph: 42.2,
            rider_ceilings_w: vec![400.0, 300.0, 400.0, 400.0],
            ..params(PacingStrategy::Fastest)
        };
        let items = compute_plan(&request, &table).unwrap();
        assert_eq!(items[1].p1_duration, 0.0);
        assert!(items[1].diagnostic_message.contains("pull forced to zero"));
        for rider in [0, 2, 3] {
            assert!((items[rider].p1_duration - 80.0).abs() < 1e-9);
        }
    }

    #[test]
    fn everybody_pull_hard_pulls_the_maximum_each_rider_can_hold() {
        let table = WattageTable::zwift_insider();
        let request = PlanParams {
            target_speed_kph: 42.2,
            rider_ceilings_w: vec![400.0, 300.0, 400.0, 400.0],
            ..params(PacingStrategy::EverybodyPullHard)
        };
        let items = compute_plan(&request, &table).unwrap();
        assert_eq!(items[1].p1_duration, 0.0);
        assert!(items[1].diagnostic_message.contains("pull forced to zero"));
        for rider in [0, 2, 3] {
            assert_eq!(items[rider].p1_duration, 120.0);
            assert!(items[rider].diagnostic_message.is_empty());
        }
    }

    #[test]
    fn extrapolated_speeds_are_flagged_on_every_item() {
        let table = WattageTable::zwift_insider();
        let request = PlanParams {
            target_speed_kph: 47.0,
            ..params(PacingStrategy::IdenticalPull)
        };
        let items = compute_plan(&request, &table).unwrap();
        for item in &items {
            assert!(item.diagnostic_message.contains("extrapolated"));
        }
    }

    #[test]
    fn validation_failures_are_atomic() {
        let table = WattageTable::zwift_insider();
        assert!(matches!(
            compute_plan(
                &PlanParams {
                    roster_size: 0,
                    ..PlanParams::default()
                },
                &table
            ),
            Err(PlanError::EmptyRoster)
        ));
        assert!(matches!(
            compute_plan(
                &PlanParams {
                    target_speed_kph: -5.0,
                    ..PlanParams::default()
                },
                &table
            ),
            Err(PlanError::InvalidPlanRequest(_))
        ));
        assert!(matches!(
            compute_plan(
                &PlanParams {
                    rotation_period_s: 0.0,
                    ..PlanParams::default()
                },
                &table
            ),
            Err(PlanError::InvalidPlanRequest(_))
        ));
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in PacingStrategy::ALL {
            assert_eq!(strategy.name().parse::<PacingStrategy>().unwrap(), strategy);
        }
        assert!(matches!(
            "tempo_surges".parse::<PacingStrategy>(),
            Err(PlanError::UnknownStrategy(_))
        ));
    }
}
