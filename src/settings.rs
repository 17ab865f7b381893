//! Plugin settings using Figment
//!
//! The host only passes the option strings from its dialog. Everything else the
//! plugin can be tuned with lives here and is loaded from:
//! 1. built-in defaults
//! 2. `config/omxyz.toml` (or a file given explicitly)
//! 3. environment variables prefixed with `OMXYZ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use omxyz_stage::settings::PluginSettings;
//!
//! // OMXYZ_LOG__LEVEL=debug OMXYZ_DRY_RUN=true
//! let settings = PluginSettings::load()?;
//! settings.validate()?;
//! # Ok::<(), omxyz_stage::error::StageError>(())
//! ```

use crate::axis::{AxisId, RoundingPolicy, SoftLimits, AXIS_COUNT};
use crate::error::{StageError, StageResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings file read by [`PluginSettings::load`].
pub const DEFAULT_SETTINGS_FILE: &str = "config/omxyz.toml";

/// Environment prefix.
pub const ENV_PREFIX: &str = "OMXYZ_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Logging
    #[serde(default)]
    pub log: LogSettings,
    /// Do not open serial ports; log the commands instead
    #[serde(default)]
    pub dry_run: bool,
    /// Log every wire command at INFO instead of DEBUG
    #[serde(default)]
    pub echo_commands: bool,
    /// Comparison tolerance as a fraction of one step (variant default if unset)
    #[serde(default)]
    pub tolerance: Option<f64>,
    /// Convergence rounding (variant default if unset)
    #[serde(default)]
    pub rounding: Option<RoundingPolicy>,
    /// Longest a blocking rotary move may hold the caller
    #[serde(default = "default_max_blocking_wait")]
    pub max_blocking_wait_ms: u64,
    /// Extra time added to a blocking move before the motor is switched off
    #[serde(default = "default_settle_margin")]
    pub settle_margin_ms: u64,
    /// Simulated travel ranges
    #[serde(default)]
    pub soft_limits: Vec<SoftLimitEntry>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
    /// pretty, compact or json
    #[serde(default)]
    pub format: OutputFormat,
}

/// Soft range for one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftLimitEntry {
    /// Axis name (`x`, `y`, `z`, `rot1`, `rot2`, `rot3`)
    pub axis: AxisId,
    /// Lowest allowed position
    pub min: f64,
    /// Highest allowed position
    pub max: f64,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_blocking_wait() -> u64 {
    600_000
}

fn default_settle_margin() -> u64 {
    2_000
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: OutputFormat::default(),
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            dry_run: false,
            echo_commands: false,
            tolerance: None,
            rounding: None,
            max_blocking_wait_ms: default_max_blocking_wait(),
            settle_margin_ms: default_settle_margin(),
            soft_limits: Vec::new(),
        }
    }
}

impl PluginSettings {
    /// Load from [`DEFAULT_SETTINGS_FILE`] and the environment.
    pub fn load() -> StageResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_FILE)
    }

    /// Load from a specific file and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Ok(Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(PluginSettings::default()))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> StageResult<()> {
        if !VALID_LEVELS.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(StageError::SettingsValidation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log.level,
                VALID_LEVELS.join(", ")
            )));
        }

        if let Some(tolerance) = self.tolerance {
            if !(tolerance > 0.0 && tolerance < 0.5) {
                return Err(StageError::SettingsValidation(format!(
                    "Invalid tolerance {}. Must be in (0, 0.5)",
                    tolerance
                )));
            }
        }

        let mut seen = Vec::new();
        for entry in &self.soft_limits {
            if !(entry.min.is_finite() && entry.max.is_finite()) || entry.min > entry.max {
                return Err(StageError::SettingsValidation(format!(
                    "Invalid soft limits for axis {}: min {} max {}",
                    entry.axis, entry.min, entry.max
                )));
            }
            if seen.contains(&entry.axis) {
                return Err(StageError::SettingsValidation(format!(
                    "Duplicate soft limits for axis {}",
                    entry.axis
                )));
            }
            seen.push(entry.axis);
        }

        Ok(())
    }

    /// Soft ranges indexed by axis slot.
    pub fn limits_by_axis(&self) -> [Option<SoftLimits>; AXIS_COUNT] {
        let mut limits = [None; AXIS_COUNT];
        for entry in &self.soft_limits {
            limits[entry.axis.index()] = Some(SoftLimits {
                min: entry.min,
                max: entry.max,
            });
        }
        limits
    }

    /// Render as a settings file that [`PluginSettings::load_from`] reads back.
    pub fn to_toml(&self) -> StageResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Upper bound for a blocking move.
    pub fn max_blocking_wait(&self) -> Duration {
        Duration::from_millis(self.max_blocking_wait_ms)
    }

    /// Margin added to a blocking move.
    pub fn settle_margin(&self) -> Duration {
        Duration::from_millis(self.settle_margin_ms)
    }
}
