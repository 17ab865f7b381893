//! Status and capability masks reported to the host.
//!
//! The status word is 64 bits wide with one byte per axis slot. Slot bytes start
//! at bit 8 (X) and run through Y, Z, rot1, rot2, rot3, so rot1 begins at bit 32.
//! Inside each byte the layout is given by [`AxisFlags`].

use crate::axis::{AxisFamily, AxisId, AxisState, LimitExcursion, MotionState};
use crate::error::{StageError, StageResult};
use crate::state::StageState;
use bitflags::bitflags;

bitflags! {
    /// Per-axis status bits, before shifting into the slot byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisFlags: u8 {
        /// Axis is converging on its demand.
        const MOVING = 0x01;
        /// Positive soft limit exceeded.
        const POSLIM = 0x02;
        /// Negative soft limit exceeded.
        const NEGLIM = 0x04;
        /// Within one step of the demand.
        const IN_POSITION = 0x08;
        /// Motor energised.
        const MOTOR_ON = 0x10;
        /// Hardware fault. Never raised: there is no feedback.
        const HWFAULT = 0x20;
        /// Over temperature. Never raised: there is no sensor.
        const OVERTEMP = 0x40;
    }
}

bitflags! {
    /// Full status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusMask: u64 {
        /// Motor-on bits of X, Y and Z.
        const ALL_XYZ_MOTORS_ON = 0x1010_1000;
        /// In-position bits of X, Y and Z.
        const ALL_XYZ_IN_POSITION = 0x0808_0800;
        /// Moving bits of X, Y and Z.
        const ANY_XYZ_MOVING = 0x0101_0100;
        /// Limit bits of X, Y and Z.
        const ANY_XYZ_LIMIT = 0x0606_0600;
        /// Motor-on bit of rot1.
        const ALL_R1_MOTORS_ON = 0x10_0000_0000;

        const _ = !0;
    }
}

impl StatusMask {
    /// Mask holding `flags` in the byte of `axis`.
    pub fn for_axis(axis: AxisId, flags: AxisFlags) -> Self {
        Self::from_bits_retain(u64::from(flags.bits()) << slot_shift(axis))
    }

    /// The flags of one axis.
    pub fn axis(self, axis: AxisId) -> AxisFlags {
        AxisFlags::from_bits_truncate((self.bits() >> slot_shift(axis)) as u8)
    }
}

fn slot_shift(axis: AxisId) -> u32 {
    8 * (axis.index() as u32 + 1)
}

bitflags! {
    /// Stage capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// Three-axis orthogonal stage. Always declared.
        const XYZ3 = 0x01;
        /// Single rotary axis.
        const ROT1 = 0x02;
        /// Three rotary axes.
        const ROT3 = 0x04;
        /// XYZ axes homed by switch.
        const HOMESWITCH_XYZ = 0x08;
        /// Rotary axes homed by switch.
        const HOMESWITCH_ROT = 0x10;
        /// Motor power can be switched by software.
        const POWER_ONOFF = 0x20;
        /// Two rotary axes.
        const ROT2 = 0x40;
        /// Motor temperatures are readable.
        const TEMPSENSOR = 0x80;
    }
}

impl Capabilities {
    /// Rotary flag for a number of rotary axes.
    pub fn for_rotary_count(count: usize) -> Self {
        match count {
            0 => Self::empty(),
            1 => Self::ROT1,
            2 => Self::ROT2,
            _ => Self::ROT3,
        }
    }
}

/// Which axes a status or temperature query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisFilter {
    /// Every slot (host index `-1`).
    All,
    /// One slot (host index `0..=5`).
    Single(AxisId),
}

impl AxisFilter {
    /// Slots covered by the filter.
    pub fn axes(self) -> Vec<AxisId> {
        match self {
            AxisFilter::All => AxisId::ALL.to_vec(),
            AxisFilter::Single(axis) => vec![axis],
        }
    }
}

impl TryFrom<i32> for AxisFilter {
    type Error = StageError;

    fn try_from(value: i32) -> StageResult<Self> {
        if value == -1 {
            return Ok(AxisFilter::All);
        }
        usize::try_from(value)
            .ok()
            .and_then(AxisId::from_index)
            .map(AxisFilter::Single)
            .ok_or(StageError::InvalidAxisIndex(value))
    }
}

/// Flags for one axis.
///
/// Present axes set exactly one of MOVING and IN_POSITION. Absent axes always
/// read IN_POSITION so the host never shows them as faulted.
pub fn axis_flags(axis: &AxisState, tolerance: f64) -> AxisFlags {
    if !axis.is_present() {
        return AxisFlags::IN_POSITION;
    }
    let mut flags = match axis.motion_state(tolerance) {
        MotionState::Converging => AxisFlags::MOVING,
        MotionState::Stationary => AxisFlags::IN_POSITION,
    };
    match axis.excursion() {
        Some(LimitExcursion::Positive) => flags |= AxisFlags::POSLIM,
        Some(LimitExcursion::Negative) => flags |= AxisFlags::NEGLIM,
        None => {}
    }
    flags
}

/// Status word for the axes selected by `filter`.
///
/// While power is on every linear slot reports MOTOR_ON (the host expects the
/// XYZ motors on even when missing), and so does every present rotary axis.
pub fn derive_status(state: &StageState, tolerance: f64, filter: AxisFilter) -> StatusMask {
    filter
        .axes()
        .into_iter()
        .fold(StatusMask::empty(), |mask, id| {
            let axis = state.axis(id);
            let mut flags = axis_flags(axis, tolerance);
            if state.power_on() && (id.family() == AxisFamily::Linear || axis.is_present()) {
                flags |= AxisFlags::MOTOR_ON;
            }
            mask | StatusMask::for_axis(id, flags)
        })
}
