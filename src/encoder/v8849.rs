use super::MotionEncoder;
use crate::axis::{AxisFamily, AxisId};
use crate::state::StageState;

/// Smallest `cvel` argument the board accepts.
pub const MIN_CVEL: u32 = 63;

/// Largest prescale factor the board accepts.
pub const MAX_PRESCALE: u32 = 32767;

const PRESCALE_FACTOR: u32 = 5;

/// Velocity registers for the V8849 board.
///
/// The board runs at `cvel / prescale` steps per second. Slow speeds are reached
/// by scaling both registers up by 5 until `cvel` clears [`MIN_CVEL`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySetup {
    /// `prescale(p)` argument; only sent when greater than 1.
    pub prescale: u32,
    /// `cvel(u)` argument.
    pub cvel: u32,
    /// Speed the board will actually run at, degrees per second.
    pub effective_speed: f64,
}

impl VelocitySetup {
    /// Registers for a requested speed in degrees per second.
    pub fn for_speed(speed_deg_s: f64, steps_per_rev: u32) -> Self {
        let steps_per_rev = steps_per_rev.max(1);
        let raw = (speed_deg_s.max(0.0) * f64::from(steps_per_rev) / 360.0).round();
        let mut cvel = if raw >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            raw as u32
        };
        let mut prescale = 1u32;

        while cvel < MIN_CVEL && prescale * PRESCALE_FACTOR <= MAX_PRESCALE {
            prescale *= PRESCALE_FACTOR;
            cvel *= PRESCALE_FACTOR;
        }
        if cvel < MIN_CVEL {
            cvel = MIN_CVEL;
        }

        let effective_speed =
            f64::from(cvel) / f64::from(prescale) * 360.0 / f64::from(steps_per_rev);
        Self {
            prescale,
            cvel,
            effective_speed,
        }
    }
}

/// Encoder for the V8849 programmable stepper board (single rotary axis,
/// absolute positions in motor steps).
#[derive(Debug, Clone, Copy)]
pub struct V8849Encoder {
    steps_per_rev: u32,
    velocity: VelocitySetup,
}

impl V8849Encoder {
    /// Encoder for a motor with `steps_per_rev` steps per turn running at
    /// `speed_deg_s`.
    pub fn new(steps_per_rev: u32, speed_deg_s: f64) -> Self {
        Self {
            steps_per_rev: steps_per_rev.max(1),
            velocity: VelocitySetup::for_speed(speed_deg_s, steps_per_rev),
        }
    }

    /// Absolute motor step for an angle in degrees.
    pub fn angle_to_steps(&self, angle: f64) -> i64 {
        (angle * f64::from(self.steps_per_rev) / 360.0).round() as i64
    }
}

impl MotionEncoder for V8849Encoder {
    fn protocol(&self) -> &'static str {
        "v8849"
    }

    fn setup_commands(&self) -> Vec<String> {
        let mut commands = vec!["new\n".to_string()];
        if self.velocity.prescale > 1 {
            commands.push(format!("prescale({})\n", self.velocity.prescale));
        }
        commands.push(format!("cvel({})\n", self.velocity.cvel));
        commands
    }

    fn encode_move(&self, state: &StageState, family: AxisFamily) -> Option<String> {
        match family {
            AxisFamily::Linear => None,
            AxisFamily::Rotary => {
                let target = self.angle_to_steps(state.axis(AxisId::Rot1).demand());
                Some(format!("Cmove({},0)\n", target))
            }
        }
    }

    fn encode_origin(&self, state: &StageState, family: AxisFamily) -> Option<String> {
        match family {
            AxisFamily::Linear => None,
            AxisFamily::Rotary => {
                let position = self.angle_to_steps(state.axis(AxisId::Rot1).current());
                Some(format!("datum(0,{})\n", position))
            }
        }
    }

    fn blocks_on_move(&self, family: AxisFamily) -> bool {
        family == AxisFamily::Rotary
    }
}
