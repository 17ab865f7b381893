//! Wire encodings for motion commands.
//!
//! Two controller families are supported:
//!
//! - [`StepDirEncoder`]: microcontroller firmware that reads one fixed-arity
//!   line of `<dir> <nsteps>` pairs per configured axis.
//! - [`V8849Encoder`]: the V8849 programmable stepper board, driven with a small
//!   textual command language (`new`, `prescale(p)`, `cvel(u)`, `datum(axis,val)`,
//!   `Cmove(val,axis)`).
//!
//! Every command produced here carries its own `\n` terminator.

mod step_dir;
mod v8849;

pub use step_dir::StepDirEncoder;
pub use v8849::{V8849Encoder, VelocitySetup};

use crate::axis::AxisFamily;
use crate::state::StageState;

/// Builds controller commands from stage state.
///
/// The controller records the new demands on [`StageState`] first and then asks
/// the encoder for the line to send, so `current` holds the position at issue
/// time and `demand` the new target.
pub trait MotionEncoder: Send + Sync {
    /// Short protocol name for logs.
    fn protocol(&self) -> &'static str;

    /// Commands sent once, right after the port is opened.
    fn setup_commands(&self) -> Vec<String> {
        Vec::new()
    }

    /// Command for a move of `family` from `current` to `demand`.
    ///
    /// `None` when this controller has nothing to send for the family.
    fn encode_move(&self, state: &StageState, family: AxisFamily) -> Option<String>;

    /// Command that redefines the controller's origin after the host sets a
    /// position without motion. Most firmwares keep no position and return `None`.
    fn encode_origin(&self, _state: &StageState, _family: AxisFamily) -> Option<String> {
        None
    }

    /// Whether a move of `family` must hold the calling thread until the
    /// motor is expected to have finished.
    fn blocks_on_move(&self, _family: AxisFamily) -> bool {
        false
    }
}
