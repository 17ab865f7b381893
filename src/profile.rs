//! Stage profiles: the hardware variants the plugin can drive.
//!
//! Each profile describes its option dialog (headers and defaults), its
//! descriptive strings and capability mask, and knows how to turn the host's
//! option strings into a [`StageConfig`]. Profiles are stateless and shared as
//! `&'static dyn StageProfile`, in the manner of a driver factory registry.
//!
//! | Variant      | Options | Axes                         | Wire protocol |
//! |--------------|---------|------------------------------|---------------|
//! | `universal`  | 9       | any of X/Y/Z and 0-3 rotary  | step/dir      |
//! | `two-axis`   | 3       | X and Y, 0.00254 mm          | step/dir      |
//! | `tomography` | 8       | rot1, 360/steps-per-rev deg  | V8849         |

use crate::axis::{AxisId, RoundingPolicy, StepMetrics, AXIS_COUNT, DEFAULT_TOLERANCE};
use crate::encoder::{MotionEncoder, StepDirEncoder, V8849Encoder};
use crate::error::{StageError, StageResult};
use crate::settings::PluginSettings;
use crate::status::Capabilities;
use crate::transport::{LineMode, SerialEndpoint};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Plugin version reported to the host.
pub const PLUGIN_VERSION: (u32, u32, u32) = (1, 0, 12);

const DESCRIPTION: &str = "XYZ stage controlled by user-supplied DLL";
const AUTHOR: &str = "OMDAQ XYZ stage plugin authors";

/// Fixed step of the two-axis stage, mm.
pub const TWO_AXIS_STEP: f64 = 0.00254;

/// Tolerance used by the two-axis stage, which rounds down.
pub const FLOOR_TOLERANCE: f64 = 0.01;

// =============================================================================
// Variant
// =============================================================================

/// The supported stage variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Up to three linear and three rotary axes on step/dir firmware.
    Universal,
    /// Fixed X/Y stage on step/dir firmware.
    TwoAxis,
    /// Single rotary axis on a V8849 board with a motor-current switch.
    Tomography,
}

impl Variant {
    /// Profile implementing this variant.
    pub fn profile(self) -> &'static dyn StageProfile {
        match self {
            Variant::Universal => &UniversalProfile,
            Variant::TwoAxis => &TwoAxisProfile,
            Variant::Tomography => &TomographyProfile,
        }
    }

    /// Kebab-case identifier.
    pub fn id(self) -> &'static str {
        match self {
            Variant::Universal => "universal",
            Variant::TwoAxis => "two-axis",
            Variant::Tomography => "tomography",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// StageConfig
// =============================================================================

/// Wire protocol selected by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Encoding {
    /// Fixed-arity `<dir> <nsteps>` tuples.
    StepDir,
    /// V8849 command language.
    V8849 {
        /// Motor steps per full turn.
        steps_per_rev: u32,
        /// Requested speed, degrees per second.
        speed_deg_s: f64,
    },
}

/// What `halt` does to pending targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HaltPolicy {
    /// Snap every demand back to the simulated position.
    HoldPosition,
    /// Leave the simulation alone.
    Ignore,
}

/// Everything the controller needs, parsed from the host's option strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConfig {
    /// Variant that produced this config.
    pub variant: Variant,
    /// Motor controller port.
    pub endpoint: SerialEndpoint,
    /// Port whose DTR line switches motor current, if fitted.
    pub control_endpoint: Option<SerialEndpoint>,
    /// Per-slot step metrics.
    pub axes: [StepMetrics; AXIS_COUNT],
    /// Wire protocol.
    pub encoding: Encoding,
    /// Convergence rounding.
    pub rounding: RoundingPolicy,
    /// Tolerance as a fraction of one step.
    pub tolerance: f64,
    /// Halt behaviour.
    pub halt: HaltPolicy,
}

impl StageConfig {
    /// Number of present rotary axes.
    pub fn rotary_count(&self) -> usize {
        AxisId::ALL[3..]
            .iter()
            .filter(|id| self.axes[id.index()].present)
            .count()
    }

    /// Number of present linear axes.
    pub fn linear_count(&self) -> usize {
        AxisId::ALL[..3]
            .iter()
            .filter(|id| self.axes[id.index()].present)
            .count()
    }

    /// Encoder for the configured protocol.
    pub fn encoder(&self) -> Box<dyn MotionEncoder> {
        match self.encoding {
            Encoding::StepDir => Box::new(StepDirEncoder::new(self.rounding, self.tolerance)),
            Encoding::V8849 {
                steps_per_rev,
                speed_deg_s,
            } => Box::new(V8849Encoder::new(steps_per_rev, speed_deg_s)),
        }
    }

    /// Zero-based indices of every port this stage opens.
    pub fn ports(&self) -> impl Iterator<Item = u32> + '_ {
        let control = self.control_endpoint.as_ref().map(|c| c.index);
        std::iter::once(self.endpoint.index).chain(control)
    }

    /// Whether both stages would open the same port.
    pub fn shares_port(&self, other: &StageConfig) -> bool {
        self.ports().any(|port| other.ports().any(|p| p == port))
    }

    /// Apply rounding and tolerance overrides from settings.
    pub fn with_settings(mut self, settings: &PluginSettings) -> Self {
        if let Some(rounding) = settings.rounding {
            self.rounding = rounding;
        }
        if let Some(tolerance) = settings.tolerance {
            self.tolerance = tolerance;
        }
        self
    }

    /// One-line hardware summary, e.g. `COM5 9600baud, mode 8N1`.
    pub fn hw_description(&self) -> String {
        format!(
            "COM{} {}baud, mode {}",
            self.endpoint.index + 1,
            self.endpoint.baud,
            self.endpoint.mode
        )
    }
}

// =============================================================================
// StageProfile
// =============================================================================

/// Static description and option parser for one variant.
pub trait StageProfile: Send + Sync {
    /// Variant implemented.
    fn variant(&self) -> Variant;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Option dialog headers, in order.
    fn option_headers(&self) -> &'static [&'static str];

    /// Option dialog defaults, same order as the headers.
    fn option_defaults(&self) -> &'static [&'static str];

    /// Number of options the host must pass to `initialize`.
    fn option_count(&self) -> usize {
        self.option_headers().len()
    }

    /// Stage description.
    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    /// Author credits.
    fn author(&self) -> &'static str {
        AUTHOR
    }

    /// Version triple.
    fn version(&self) -> (u32, u32, u32) {
        PLUGIN_VERSION
    }

    /// Capability mask; `config` is `None` before options were accepted.
    fn capabilities(&self, config: Option<&StageConfig>) -> Capabilities {
        Capabilities::XYZ3
            | config
                .map(|c| Capabilities::for_rotary_count(c.rotary_count()))
                .unwrap_or_default()
    }

    /// Turn option strings into a config.
    fn parse(&self, options: &[String]) -> StageResult<StageConfig>;
}

fn check_count(profile: &dyn StageProfile, options: &[String]) -> StageResult<()> {
    if options.len() != profile.option_count() {
        return Err(StageError::OptionCount {
            expected: profile.option_count(),
            actual: options.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Option parsing
// =============================================================================

fn parse_com(name: &str, value: &str) -> StageResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(com) if com >= 1 => Ok(com - 1),
        Ok(_) => Err(StageError::invalid_option(name, value, "port numbers start at 1")),
        Err(_) => Err(StageError::invalid_option(name, value, "expected a port number")),
    }
}

fn parse_baud(name: &str, value: &str) -> StageResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(baud) if baud > 0 => Ok(baud),
        _ => Err(StageError::invalid_option(name, value, "expected a positive baud rate")),
    }
}

fn parse_mode(name: &str, value: &str) -> StageResult<LineMode> {
    value
        .parse()
        .map_err(|reason: String| StageError::invalid_option(name, value, reason))
}

fn parse_endpoint(names: [&str; 3], values: &[String]) -> StageResult<SerialEndpoint> {
    Ok(SerialEndpoint {
        index: parse_com(names[0], &values[0])?,
        baud: parse_baud(names[1], &values[1])?,
        mode: parse_mode(names[2], &values[2])?,
    })
}

/// Interpret a step-size option.
///
/// Tokens made only of digits and `.` are step sizes and must parse; anything
/// else (`missing`, `-`, empty) marks the axis as not fitted.
fn parse_step(name: &str, value: &str) -> StageResult<StepMetrics> {
    let token = value.trim();
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Ok(StepMetrics::absent());
    }
    let step: f64 = token
        .parse()
        .map_err(|_| StageError::invalid_option(name, value, "not a number"))?;
    let metrics = StepMetrics::present(step);
    if !metrics.present {
        warn!(option = name, value, "Zero step size, axis treated as absent");
    }
    Ok(metrics)
}

// =============================================================================
// Profiles
// =============================================================================

/// Universal step/dir stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniversalProfile;

impl StageProfile for UniversalProfile {
    fn variant(&self) -> Variant {
        Variant::Universal
    }

    fn name(&self) -> &'static str {
        "Universal step/dir stage"
    }

    fn option_headers(&self) -> &'static [&'static str] {
        &[
            "COM",
            "Baud",
            "Mode",
            "Step (X)",
            "Step (Y)",
            "Step (Z)",
            "Step (rot1)",
            "Step (rot2)",
            "Step (rot3)",
        ]
    }

    fn option_defaults(&self) -> &'static [&'static str] {
        &[
            "5", "9600", "8N1", "0.00254", "0.00254", "missing", "missing", "missing", "missing",
        ]
    }

    fn parse(&self, options: &[String]) -> StageResult<StageConfig> {
        check_count(self, options)?;
        let headers = self.option_headers();
        let endpoint = parse_endpoint([headers[0], headers[1], headers[2]], &options[..3])?;

        let mut axes = [StepMetrics::absent(); AXIS_COUNT];
        for i in 0..3 {
            axes[i] = parse_step(headers[3 + i], &options[3 + i])?;
        }
        // present rotary axes are packed into the leading rotary slots
        let mut slot = 3;
        for i in 0..3 {
            let metrics = parse_step(headers[6 + i], &options[6 + i])?;
            if metrics.present {
                axes[slot] = metrics;
                slot += 1;
            }
        }

        Ok(StageConfig {
            variant: Variant::Universal,
            endpoint,
            control_endpoint: None,
            axes,
            encoding: Encoding::StepDir,
            rounding: RoundingPolicy::Nearest,
            tolerance: DEFAULT_TOLERANCE,
            halt: HaltPolicy::HoldPosition,
        })
    }
}

/// Two-axis X/Y stage with fixed step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoAxisProfile;

impl StageProfile for TwoAxisProfile {
    fn variant(&self) -> Variant {
        Variant::TwoAxis
    }

    fn name(&self) -> &'static str {
        "Two-axis X/Y stage"
    }

    fn option_headers(&self) -> &'static [&'static str] {
        &["COM", "Baud", "Mode"]
    }

    fn option_defaults(&self) -> &'static [&'static str] {
        &["5", "9600", "8N1"]
    }

    fn capabilities(&self, _config: Option<&StageConfig>) -> Capabilities {
        Capabilities::XYZ3
    }

    fn parse(&self, options: &[String]) -> StageResult<StageConfig> {
        check_count(self, options)?;
        let headers = self.option_headers();
        let endpoint = parse_endpoint([headers[0], headers[1], headers[2]], options)?;

        let mut axes = [StepMetrics::absent(); AXIS_COUNT];
        axes[AxisId::X.index()] = StepMetrics::present(TWO_AXIS_STEP);
        axes[AxisId::Y.index()] = StepMetrics::present(TWO_AXIS_STEP);

        Ok(StageConfig {
            variant: Variant::TwoAxis,
            endpoint,
            control_endpoint: None,
            axes,
            encoding: Encoding::StepDir,
            rounding: RoundingPolicy::Floor,
            tolerance: FLOOR_TOLERANCE,
            halt: HaltPolicy::Ignore,
        })
    }
}

/// Rotary tomography stage on a V8849 board.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomographyProfile;

impl StageProfile for TomographyProfile {
    fn variant(&self) -> Variant {
        Variant::Tomography
    }

    fn name(&self) -> &'static str {
        "Tomography rotary stage (V8849)"
    }

    fn option_headers(&self) -> &'static [&'static str] {
        &[
            "COM",
            "Baud",
            "Mode",
            "COM (noise)",
            "Baud (noise)",
            "Mode (noise)",
            "Speed (deg/s)",
            "Steps/rotation",
        ]
    }

    fn option_defaults(&self) -> &'static [&'static str] {
        &["5", "9600", "8N1", "0", "9600", "8N1", "30", "800"]
    }

    fn capabilities(&self, _config: Option<&StageConfig>) -> Capabilities {
        Capabilities::XYZ3 | Capabilities::ROT1
    }

    fn parse(&self, options: &[String]) -> StageResult<StageConfig> {
        check_count(self, options)?;
        let headers = self.option_headers();
        let endpoint = parse_endpoint([headers[0], headers[1], headers[2]], &options[..3])?;

        let control_endpoint = if options[3].trim() == "0" {
            None
        } else {
            Some(parse_endpoint(
                [headers[3], headers[4], headers[5]],
                &options[3..6],
            )?)
        };

        let speed_deg_s: f64 = options[6]
            .trim()
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite() && *s > 0.0)
            .ok_or_else(|| {
                StageError::invalid_option(headers[6], &options[6], "expected a positive speed")
            })?;
        let steps_per_rev: u32 = options[7]
            .trim()
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                StageError::invalid_option(
                    headers[7],
                    &options[7],
                    "expected a positive step count",
                )
            })?;

        let mut axes = [StepMetrics::absent(); AXIS_COUNT];
        axes[AxisId::Rot1.index()] = StepMetrics::present(360.0 / f64::from(steps_per_rev));

        Ok(StageConfig {
            variant: Variant::Tomography,
            endpoint,
            control_endpoint,
            axes,
            encoding: Encoding::V8849 {
                steps_per_rev,
                speed_deg_s,
            },
            rounding: RoundingPolicy::Nearest,
            tolerance: DEFAULT_TOLERANCE,
            halt: HaltPolicy::HoldPosition,
        })
    }
}
