use super::MotionEncoder;
use crate::axis::{AxisFamily, AxisId, RoundingPolicy};
use crate::state::StageState;

/// Step/direction tuple encoder.
///
/// One pair per present axis in canonical order (X, Y, Z, rot1, rot2, rot3).
/// Axes of the family that is not moving are sent as `0 0`; absent axes are
/// left out entirely, so the arity only depends on the configured axes.
#[derive(Debug, Clone, Copy)]
pub struct StepDirEncoder {
    rounding: RoundingPolicy,
    tolerance: f64,
}

impl StepDirEncoder {
    /// Encoder whose step counts agree with the given simulation policy.
    pub fn new(rounding: RoundingPolicy, tolerance: f64) -> Self {
        Self {
            rounding,
            tolerance,
        }
    }

    fn pair(&self, state: &StageState, id: AxisId) -> (u8, u64) {
        let axis = state.axis(id);
        let gap = axis.demand() - axis.current();
        let direction = u8::from(gap > 0.0);
        let steps = self
            .rounding
            .step_count(gap.abs(), axis.metrics().step, self.tolerance);
        (direction, steps)
    }
}

impl MotionEncoder for StepDirEncoder {
    fn protocol(&self) -> &'static str {
        "step-dir"
    }

    fn encode_move(&self, state: &StageState, family: AxisFamily) -> Option<String> {
        let fields: Vec<String> = AxisId::ALL
            .into_iter()
            .filter(|id| state.axis(*id).is_present())
            .map(|id| {
                let (direction, steps) = if id.family() == family {
                    self.pair(state, id)
                } else {
                    (0, 0)
                };
                format!("{} {}", direction, steps)
            })
            .collect();

        if fields.is_empty() {
            return None;
        }
        Some(format!("{}\n", fields.join(" ")))
    }
}
