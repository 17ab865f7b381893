//! Per-axis step metrics and position simulation.
//!
//! The stage has no position feedback. Each axis therefore keeps two numbers:
//! the `demand` last requested by the host and a simulated `current` that
//! catches up with it in whole multiples of the step size whenever the host
//! asks where the stage is.
//!
//! Units are whatever the host uses for the family: millimetres for the linear
//! axes and degrees for the rotary ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of axis slots exposed to the host (3 linear + 3 rotary).
pub const AXIS_COUNT: usize = 6;

/// Default comparison tolerance, as a fraction of one step.
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Linear or rotary degree of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisFamily {
    /// Translation axes X, Y, Z (mm).
    Linear,
    /// Rotation axes rot1..rot3 (degrees).
    Rotary,
}

impl AxisFamily {
    /// The three axes of this family in canonical order.
    pub fn axes(self) -> [AxisId; 3] {
        match self {
            AxisFamily::Linear => [AxisId::X, AxisId::Y, AxisId::Z],
            AxisFamily::Rotary => [AxisId::Rot1, AxisId::Rot2, AxisId::Rot3],
        }
    }
}

/// One of the six axis slots, in the canonical wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisId {
    /// Linear X.
    X,
    /// Linear Y.
    Y,
    /// Linear Z.
    Z,
    /// First rotary axis.
    Rot1,
    /// Second rotary axis.
    Rot2,
    /// Third rotary axis.
    Rot3,
}

impl AxisId {
    /// All slots in canonical order.
    pub const ALL: [AxisId; AXIS_COUNT] = [
        AxisId::X,
        AxisId::Y,
        AxisId::Z,
        AxisId::Rot1,
        AxisId::Rot2,
        AxisId::Rot3,
    ];

    /// Slot index, 0..=5.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Slot for an index, if in range.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Family this slot belongs to.
    pub fn family(self) -> AxisFamily {
        if self.index() < 3 {
            AxisFamily::Linear
        } else {
            AxisFamily::Rotary
        }
    }

    /// Position of the slot inside its family (0..=2).
    pub fn family_index(self) -> usize {
        self.index() % 3
    }

    /// Short lowercase name used in settings and logs.
    pub fn name(self) -> &'static str {
        match self {
            AxisId::X => "x",
            AxisId::Y => "y",
            AxisId::Z => "z",
            AxisId::Rot1 => "rot1",
            AxisId::Rot2 => "rot2",
            AxisId::Rot3 => "rot3",
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AxisId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxisId::ALL
            .into_iter()
            .find(|axis| axis.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown axis '{}'", s))
    }
}

/// How the simulated position settles on a step multiple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingPolicy {
    /// Stop on the step multiple closest to the demand, overshooting by at most
    /// one step when that lands closer.
    #[default]
    Nearest,
    /// Never pass the demand; stop on the last full step before it.
    Floor,
}

impl RoundingPolicy {
    /// Whole steps needed to cover `distance` (non-negative) with this policy.
    ///
    /// Full steps are taken while at least `step * (1 - tolerance)` remains.
    /// [`RoundingPolicy::Nearest`] adds one more step only when the remainder is
    /// strictly over half a step, so an exact half-step tie stops short.
    /// [`AxisState::advance`] moves by exactly this count, which keeps the
    /// firmware and the simulation on the same step multiple.
    pub fn step_count(self, distance: f64, step: f64, tolerance: f64) -> u64 {
        if !(step > 0.0) || !distance.is_finite() || distance <= 0.0 {
            return 0;
        }
        let ratio = distance / step;
        let whole = (ratio + tolerance).floor();
        let steps = match self {
            RoundingPolicy::Nearest if ratio - whole > 0.5 => whole + 1.0,
            _ => whole,
        };
        if steps <= 0.0 {
            0
        } else {
            steps as u64
        }
    }
}

/// Static description of one axis slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Whether the degree of freedom physically exists.
    pub present: bool,
    /// Smallest realizable increment; 0 when absent.
    pub step: f64,
}

impl StepMetrics {
    /// A present axis with the given step size.
    ///
    /// A non-positive or non-finite step yields an absent axis: a zero step can
    /// never be used as a divisor.
    pub fn present(step: f64) -> Self {
        if step.is_finite() && step > 0.0 {
            Self {
                present: true,
                step,
            }
        } else {
            Self::absent()
        }
    }

    /// An axis that does not exist.
    pub const fn absent() -> Self {
        Self {
            present: false,
            step: 0.0,
        }
    }

    /// Distance below which two positions are the same step, `step * (1 - tolerance)`.
    pub fn threshold(&self, tolerance: f64) -> f64 {
        self.step * (1.0 - tolerance)
    }
}

impl Default for StepMetrics {
    fn default() -> Self {
        Self::absent()
    }
}

/// Simulated travel range for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftLimits {
    /// Lowest allowed position.
    pub min: f64,
    /// Highest allowed position.
    pub max: f64,
}

/// Which side of a soft range an axis is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExcursion {
    /// Above `max`.
    Positive,
    /// Below `min`.
    Negative,
}

impl SoftLimits {
    /// Check a position against the range.
    pub fn excursion(&self, position: f64) -> Option<LimitExcursion> {
        if position > self.max {
            Some(LimitExcursion::Positive)
        } else if position < self.min {
            Some(LimitExcursion::Negative)
        } else {
            None
        }
    }

    /// Bring a position back inside the range.
    pub fn clamp(&self, position: f64) -> f64 {
        position.clamp(self.min, self.max)
    }
}

/// Motion state of a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// `current` is within one step of `demand`.
    Stationary,
    /// A move is still being simulated.
    Converging,
}

/// Live position pair for one axis slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisState {
    metrics: StepMetrics,
    current: f64,
    demand: f64,
    limits: Option<SoftLimits>,
}

impl AxisState {
    /// New axis at the origin.
    pub fn new(metrics: StepMetrics) -> Self {
        Self {
            metrics,
            current: 0.0,
            demand: 0.0,
            limits: None,
        }
    }

    /// Attach a simulated travel range.
    pub fn with_limits(mut self, limits: Option<SoftLimits>) -> Self {
        self.limits = limits;
        self
    }

    /// Step metrics.
    pub fn metrics(&self) -> StepMetrics {
        self.metrics
    }

    /// Whether the axis exists.
    pub fn is_present(&self) -> bool {
        self.metrics.present
    }

    /// Simulated position.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Last requested position.
    pub fn demand(&self) -> f64 {
        self.demand
    }

    /// Soft range, if configured.
    pub fn limits(&self) -> Option<SoftLimits> {
        self.limits
    }

    /// Redefine the position without motion (host origin change or restore).
    pub fn set_origin(&mut self, position: f64) {
        if self.metrics.present {
            self.current = position;
            self.demand = position;
        } else {
            self.zero();
        }
    }

    /// Record a new target. Absent axes ignore it.
    pub fn set_demand(&mut self, position: f64) {
        if self.metrics.present {
            self.demand = position;
        } else {
            self.zero();
        }
    }

    /// Abandon the pending target and stay where the simulation has got to.
    pub fn hold(&mut self) {
        self.demand = self.current;
    }

    /// Move the simulated position toward the demand by whole steps.
    ///
    /// The number of steps is [`RoundingPolicy::step_count`] for the remaining
    /// gap. With `tolerance` below half a step, further calls change nothing
    /// once converged.
    pub fn advance(&mut self, policy: RoundingPolicy, tolerance: f64) {
        if !self.metrics.present {
            self.zero();
            return;
        }
        if self.demand == self.current {
            return;
        }

        let step = self.metrics.step;
        let gap = self.demand - self.current;
        let steps = policy.step_count(gap.abs(), step, tolerance);
        if steps > 0 {
            self.current += gap.signum() * steps as f64 * step;
        }
    }

    /// Stationary when within one step of the demand.
    pub fn motion_state(&self, tolerance: f64) -> MotionState {
        if !self.metrics.present
            || (self.current - self.demand).abs() < self.metrics.threshold(tolerance)
        {
            MotionState::Stationary
        } else {
            MotionState::Converging
        }
    }

    /// Soft-limit excursion of the simulated position, if any.
    pub fn excursion(&self) -> Option<LimitExcursion> {
        if !self.metrics.present {
            return None;
        }
        self.limits.and_then(|limits| limits.excursion(self.current))
    }

    /// Clamp `current` and `demand` back inside the soft range.
    ///
    /// Returns `true` when anything changed.
    pub fn clear_excursion(&mut self) -> bool {
        let Some(limits) = self.limits else {
            return false;
        };
        if !self.metrics.present {
            return false;
        }
        let current = limits.clamp(self.current);
        let demand = limits.clamp(self.demand);
        let changed = current != self.current || demand != self.demand;
        self.current = current;
        self.demand = demand;
        changed
    }

    fn zero(&mut self) {
        self.current = 0.0;
        self.demand = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f64 = 0.00254;

    fn linear(step: f64) -> AxisState {
        AxisState::new(StepMetrics::present(step))
    }

    #[test]
    fn absent_axis_stays_at_zero() {
        let mut axis = AxisState::new(StepMetrics::absent());
        axis.set_demand(12.5);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert_eq!(axis.current(), 0.0);
        assert_eq!(axis.demand(), 0.0);

        axis.set_origin(3.0);
        assert_eq!(axis.current(), 0.0);
        assert_eq!(axis.demand(), 0.0);
    }

    #[test]
    fn zero_step_is_absent() {
        assert!(!StepMetrics::present(0.0).present);
        assert!(!StepMetrics::present(-1.0).present);
        assert!(!StepMetrics::present(f64::NAN).present);
    }

    #[test]
    fn nearest_takes_the_closer_step() {
        let mut axis = linear(STEP);
        axis.set_demand(0.0033);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert!((axis.current() - STEP).abs() < 1e-12);
    }

    #[test]
    fn nearest_overshoots_when_closer() {
        let mut axis = linear(STEP);
        // 1.8 steps: two steps land 0.2 step past, one step lands 0.8 short
        axis.set_demand(1.8 * STEP);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert!((axis.current() - 2.0 * STEP).abs() < 1e-12);
    }

    #[test]
    fn floor_never_passes_demand() {
        let mut axis = linear(STEP);
        axis.set_demand(1.8 * STEP);
        axis.advance(RoundingPolicy::Floor, 0.01);
        assert!((axis.current() - STEP).abs() < 1e-12);
    }

    #[test]
    fn negative_moves_converge_too() {
        let mut axis = linear(STEP);
        axis.set_origin(1.0);
        axis.set_demand(1.0 - 0.0127);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert!((axis.current() - (1.0 - 5.0 * STEP)).abs() < 1e-9);
        assert_eq!(axis.motion_state(DEFAULT_TOLERANCE), MotionState::Stationary);
    }

    #[test]
    fn advance_is_idempotent_once_converged() {
        for policy in [RoundingPolicy::Nearest, RoundingPolicy::Floor] {
            let mut axis = linear(STEP);
            axis.set_demand(0.731);
            axis.advance(policy, DEFAULT_TOLERANCE);
            let settled = axis.current();
            assert!((settled - axis.demand()).abs() < STEP);
            for _ in 0..5 {
                axis.advance(policy, DEFAULT_TOLERANCE);
                assert_eq!(axis.current(), settled);
            }
        }
    }

    #[test]
    fn demand_within_one_step_is_already_stationary() {
        let mut axis = linear(STEP);
        axis.set_demand(0.4 * STEP);
        assert_eq!(axis.motion_state(DEFAULT_TOLERANCE), MotionState::Stationary);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert_eq!(axis.current(), 0.0);
    }

    #[test]
    fn converging_until_advanced() {
        let mut axis = linear(0.1);
        axis.set_demand(5.0);
        assert_eq!(axis.motion_state(DEFAULT_TOLERANCE), MotionState::Converging);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert_eq!(axis.motion_state(DEFAULT_TOLERANCE), MotionState::Stationary);
    }

    #[test]
    fn step_count_matches_policy() {
        assert_eq!(RoundingPolicy::Nearest.step_count(0.0254, STEP, 0.001), 10);
        assert_eq!(RoundingPolicy::Nearest.step_count(0.0127, STEP, 0.001), 5);
        assert_eq!(RoundingPolicy::Nearest.step_count(1.6 * STEP, STEP, 0.001), 2);
        assert_eq!(RoundingPolicy::Floor.step_count(1.6 * STEP, STEP, 0.01), 1);
        assert_eq!(RoundingPolicy::Floor.step_count(0.0, STEP, 0.01), 0);
        assert_eq!(RoundingPolicy::Nearest.step_count(1.0, 0.0, 0.001), 0);
    }

    #[test]
    fn half_step_tie_stops_short_on_wire_and_in_simulation() {
        assert_eq!(RoundingPolicy::Nearest.step_count(1.25, 0.5, DEFAULT_TOLERANCE), 2);
        assert_eq!(RoundingPolicy::Nearest.step_count(1.26, 0.5, DEFAULT_TOLERANCE), 3);

        let mut axis = linear(0.5);
        axis.set_demand(1.25);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert_eq!(axis.current(), 1.0);
    }

    #[test]
    fn soft_limits_report_and_clamp() {
        let mut axis = linear(0.5).with_limits(Some(SoftLimits { min: -1.0, max: 1.0 }));
        axis.set_demand(3.0);
        axis.advance(RoundingPolicy::Nearest, DEFAULT_TOLERANCE);
        assert_eq!(axis.excursion(), Some(LimitExcursion::Positive));

        assert!(axis.clear_excursion());
        assert_eq!(axis.current(), 1.0);
        assert_eq!(axis.demand(), 1.0);
        assert_eq!(axis.excursion(), None);
        assert!(!axis.clear_excursion());
    }

    #[test]
    fn axis_ids_round_trip_through_names() {
        for axis in AxisId::ALL {
            assert_eq!(axis.name().parse::<AxisId>(), Ok(axis));
            assert_eq!(AxisId::from_index(axis.index()), Some(axis));
        }
        assert_eq!(AxisId::Rot2.family(), AxisFamily::Rotary);
        assert_eq!(AxisId::Rot2.family_index(), 1);
        assert!("w".parse::<AxisId>().is_err());
    }
}
