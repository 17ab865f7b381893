//! Aggregate stage state shared by every host call.
//!
//! One [`StageState`] exists per initialized session. The controller keeps it
//! behind a single mutex so that a position query on one host thread never
//! observes a half-written move from another.

use crate::axis::{
    AxisFamily, AxisId, AxisState, MotionState, RoundingPolicy, SoftLimits, StepMetrics,
    AXIS_COUNT,
};
use std::time::Instant;

/// Speed and acceleration values handed over by the host.
///
/// Stored and reported back only; no kinematics are simulated from them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicLimits {
    /// Per-axis speed, host units per second.
    pub speed: [f64; 3],
    /// Per-axis acceleration, host units per second squared.
    pub accel: [f64; 3],
}

/// Bookkeeping for one axis family.
#[derive(Debug, Clone, Copy, Default)]
pub struct FamilyClock {
    /// When the last move for this family was written to the wire.
    pub issued_at: Option<Instant>,
    /// Host-provided speed/accel.
    pub limits: KinematicLimits,
}

/// All six axes plus global flags.
#[derive(Debug, Clone)]
pub struct StageState {
    axes: [AxisState; AXIS_COUNT],
    power_on: bool,
    linear: FamilyClock,
    rotary: FamilyClock,
}

impl StageState {
    /// Build state from step metrics and optional soft limits.
    pub fn new(
        metrics: [StepMetrics; AXIS_COUNT],
        limits: [Option<SoftLimits>; AXIS_COUNT],
    ) -> Self {
        let axes = std::array::from_fn(|i| AxisState::new(metrics[i]).with_limits(limits[i]));
        Self {
            axes,
            power_on: false,
            linear: FamilyClock::default(),
            rotary: FamilyClock::default(),
        }
    }

    /// One axis.
    pub fn axis(&self, id: AxisId) -> &AxisState {
        &self.axes[id.index()]
    }

    /// One axis, mutable.
    pub fn axis_mut(&mut self, id: AxisId) -> &mut AxisState {
        &mut self.axes[id.index()]
    }

    /// All axes in canonical order.
    pub fn axes(&self) -> &[AxisState; AXIS_COUNT] {
        &self.axes
    }

    /// Global motor power flag.
    pub fn power_on(&self) -> bool {
        self.power_on
    }

    /// Set the global motor power flag.
    pub fn set_power(&mut self, enabled: bool) {
        self.power_on = enabled;
    }

    /// Family bookkeeping.
    pub fn clock(&self, family: AxisFamily) -> &FamilyClock {
        match family {
            AxisFamily::Linear => &self.linear,
            AxisFamily::Rotary => &self.rotary,
        }
    }

    fn clock_mut(&mut self, family: AxisFamily) -> &mut FamilyClock {
        match family {
            AxisFamily::Linear => &mut self.linear,
            AxisFamily::Rotary => &mut self.rotary,
        }
    }

    /// Simulated positions of a family.
    pub fn currents(&self, family: AxisFamily) -> [f64; 3] {
        family.axes().map(|id| self.axis(id).current())
    }

    /// Demands of a family.
    pub fn demands(&self, family: AxisFamily) -> [f64; 3] {
        family.axes().map(|id| self.axis(id).demand())
    }

    /// Record new demands for a family and stamp the issue time.
    pub fn set_demands(&mut self, family: AxisFamily, targets: [f64; 3]) {
        for (id, target) in family.axes().into_iter().zip(targets) {
            self.axis_mut(id).set_demand(target);
        }
        self.clock_mut(family).issued_at = Some(Instant::now());
    }

    /// Redefine positions of a family without motion.
    pub fn set_origin(&mut self, family: AxisFamily, positions: [f64; 3]) {
        for (id, position) in family.axes().into_iter().zip(positions) {
            self.axis_mut(id).set_origin(position);
        }
    }

    /// Advance every axis of a family and return the new positions.
    pub fn advance(
        &mut self,
        family: AxisFamily,
        policy: RoundingPolicy,
        tolerance: f64,
    ) -> [f64; 3] {
        for id in family.axes() {
            self.axis_mut(id).advance(policy, tolerance);
        }
        self.currents(family)
    }

    /// Drop pending targets on every axis.
    pub fn hold_all(&mut self) {
        for axis in &mut self.axes {
            axis.hold();
        }
    }

    /// Whether any present axis still has a pending move.
    pub fn is_converging(&self, tolerance: f64) -> bool {
        self.axes
            .iter()
            .any(|axis| axis.motion_state(tolerance) == MotionState::Converging)
    }

    /// Store host speeds for a family.
    pub fn set_speed(&mut self, family: AxisFamily, speed: [f64; 3]) {
        self.clock_mut(family).limits.speed = speed;
    }

    /// Store host accelerations for a family.
    pub fn set_accel(&mut self, family: AxisFamily, accel: [f64; 3]) {
        self.clock_mut(family).limits.accel = accel;
    }

    /// Clamp every axis back into its soft range. Returns the axes that moved.
    pub fn clear_excursions(&mut self) -> Vec<AxisId> {
        AxisId::ALL
            .into_iter()
            .filter(|id| self.axis_mut(*id).clear_excursion())
            .collect()
    }

    /// Axes currently outside their soft range.
    pub fn excursions(&self) -> Vec<AxisId> {
        AxisId::ALL
            .into_iter()
            .filter(|id| self.axis(*id).excursion().is_some())
            .collect()
    }
}
