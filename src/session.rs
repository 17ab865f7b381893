//! Host-facing session facade.
//!
//! [`PluginSession`] mirrors the host's plugin entry points one-for-one with
//! plain Rust types. It owns the option dialog values and, after a successful
//! `initialize`, the [`StageController`].
//!
//! Return conventions follow the host: `initialize` reports failure, every other
//! call reports success. Transport errors past initialization are logged here and
//! not passed on, because the host has no way to act on them.

use crate::axis::AxisFamily;
use crate::controller::{FaultAck, StageController, NO_FAULT_TEXT};
use crate::error::{StageError, StageResult};
use crate::logging;
use crate::profile::{StageProfile, Variant};
use crate::settings::PluginSettings;
use crate::status::{AxisFilter, Capabilities, StatusMask};
use crate::transport::{Connector, NullConnector};
use tracing::{error, info, warn};

/// One plugin instance as seen by the host.
pub struct PluginSession {
    profile: &'static dyn StageProfile,
    connector: Box<dyn Connector>,
    settings: PluginSettings,
    options: Vec<String>,
    controller: Option<StageController>,
}

impl std::fmt::Debug for PluginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSession")
            .field("variant", &self.profile.variant())
            .field("options", &self.options)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl PluginSession {
    /// Load settings from the default file and environment, set up logging and
    /// create a session.
    pub fn load(variant: Variant) -> StageResult<Self> {
        let settings = PluginSettings::load()?;
        settings.validate()?;
        logging::init_from_settings(&settings)?;
        Ok(Self::new(variant, settings))
    }

    /// Session using real serial ports, or the dry-run connector when
    /// `settings.dry_run` is set.
    pub fn new(variant: Variant, settings: PluginSettings) -> Self {
        let connector = default_connector(settings.dry_run);
        Self::with_connector(variant, settings, connector)
    }

    /// Session with an explicit connector.
    pub fn with_connector(
        variant: Variant,
        settings: PluginSettings,
        connector: Box<dyn Connector>,
    ) -> Self {
        let profile = variant.profile();
        Self {
            profile,
            connector,
            settings,
            options: profile.option_defaults().iter().map(|s| s.to_string()).collect(),
            controller: None,
        }
    }

    /// Profile in use.
    pub fn profile(&self) -> &'static dyn StageProfile {
        self.profile
    }

    /// Running controller, if initialized.
    pub fn controller(&self) -> Option<&StageController> {
        self.controller.as_ref()
    }

    // =========================================================================
    // Descriptive accessors
    // =========================================================================

    /// Capability mask. Rotary flags appear once options have been accepted.
    pub fn capability_mask(&self) -> Capabilities {
        self.profile
            .capabilities(self.controller.as_ref().map(|c| c.config()))
    }

    /// `(major, minor, build)`.
    pub fn dll_version(&self) -> (u32, u32, u32) {
        self.profile.version()
    }

    /// Stage description.
    pub fn description(&self) -> &'static str {
        self.profile.description()
    }

    /// Port summary built from the current option values.
    pub fn hw_description(&self) -> String {
        match self.controller.as_ref() {
            Some(controller) => controller.config().hw_description(),
            None => format!(
                "COM{} {}baud, mode {}",
                self.options[0], self.options[1], self.options[2]
            ),
        }
    }

    /// Author credits.
    pub fn author(&self) -> &'static str {
        self.profile.author()
    }

    /// Number of dialog options.
    pub fn option_count(&self) -> usize {
        self.profile.option_count()
    }

    /// Dialog header `index`, or `None` when out of range.
    pub fn option_header(&self, index: usize) -> Option<&'static str> {
        self.profile.option_headers().get(index).copied()
    }

    /// Dialog value `index`: the default before initialize, the accepted value after.
    pub fn option_value(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Parse the options and bring the stage up.
    ///
    /// Options that do not parse change nothing. A running controller holding
    /// any of the requested ports is shut down before they are opened, so if
    /// that open then fails the session is left uninitialized. Otherwise a
    /// failed open keeps the previous controller running. The option values
    /// only change on success.
    pub fn initialize(&mut self, options: &[String]) -> bool {
        let config = match self.profile.parse(options) {
            Ok(config) => config,
            Err(e) => {
                error!(variant = %self.profile.variant(), error = %e, "Initialization failed");
                return false;
            }
        };

        // serial ports are exclusive: release the ones being reused first
        if matches!(&self.controller, Some(running) if running.config().shares_port(&config)) {
            if let Some(previous) = self.controller.take() {
                let hw = previous.config().hw_description();
                info!(hw = %hw, "Releasing ports for re-initialize");
                previous.shutdown();
            }
        }

        match StageController::initialize(config, self.connector.as_ref(), &self.settings) {
            Ok(controller) => {
                if let Some(previous) = self.controller.replace(controller) {
                    previous.shutdown();
                }
                self.options = options.to_vec();
                info!(variant = %self.profile.variant(), "Session initialized");
                true
            }
            Err(e) => {
                error!(variant = %self.profile.variant(), error = %e, "Initialization failed");
                false
            }
        }
    }

    /// Release the controller and its ports.
    pub fn shutdown(&mut self) -> bool {
        if let Some(controller) = self.controller.take() {
            controller.shutdown();
        }
        true
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Redefine the linear position without moving.
    pub fn set_current_position(&self, position: [f64; 3]) -> bool {
        self.run("set_current_position", |c| c.set_origin(AxisFamily::Linear, position))
    }

    /// Redefine the angular position without moving.
    pub fn set_current_angle(&self, angle: [f64; 3]) -> bool {
        self.run("set_current_angle", |c| c.set_origin(AxisFamily::Rotary, angle))
    }

    /// Move the linear axes.
    pub fn move_to_position(&self, position: [f64; 3]) -> bool {
        self.run("move_to_position", |c| c.move_to(AxisFamily::Linear, position))
    }

    /// Move the rotary axes.
    pub fn move_to_angle(&self, angle: [f64; 3]) -> bool {
        self.run("move_to_angle", |c| c.move_to(AxisFamily::Rotary, angle))
    }

    /// Simulated linear position; zeros before initialize.
    pub fn get_position(&self) -> [f64; 3] {
        self.controller
            .as_ref()
            .map(|c| c.position(AxisFamily::Linear))
            .unwrap_or_default()
    }

    /// Simulated angular position; zeros before initialize.
    pub fn get_angle(&self) -> [f64; 3] {
        self.controller
            .as_ref()
            .map(|c| c.position(AxisFamily::Rotary))
            .unwrap_or_default()
    }

    /// Emergency stop.
    pub fn halt(&self) -> bool {
        self.run("halt", |c| {
            c.halt();
            Ok(())
        })
    }

    /// Store linear speeds.
    pub fn set_speed(&self, speed: [f64; 3]) -> bool {
        self.run("set_speed", |c| {
            c.set_speed(AxisFamily::Linear, speed);
            Ok(())
        })
    }

    /// Store rotary speeds.
    pub fn set_rot_speed(&self, speed: [f64; 3]) -> bool {
        self.run("set_rot_speed", |c| {
            c.set_speed(AxisFamily::Rotary, speed);
            Ok(())
        })
    }

    /// Store linear accelerations.
    pub fn set_accel(&self, accel: [f64; 3]) -> bool {
        self.run("set_accel", |c| {
            c.set_accel(AxisFamily::Linear, accel);
            Ok(())
        })
    }

    /// Store rotary accelerations.
    pub fn set_rot_accel(&self, accel: [f64; 3]) -> bool {
        self.run("set_rot_accel", |c| {
            c.set_accel(AxisFamily::Rotary, accel);
            Ok(())
        })
    }

    // =========================================================================
    // Power, status, faults
    // =========================================================================

    /// Switch motor power.
    pub fn power_on(&self, enabled: bool) -> bool {
        self.run("power_on", |c| c.power_on(enabled))
    }

    /// Simulated temperatures for host axis index `axis` (`-1` for all).
    ///
    /// `None` for an index outside `-1..=5`.
    pub fn motor_temperature(&self, axis: i32) -> Option<Vec<f64>> {
        let filter = self.filter(axis)?;
        Some(match self.controller.as_ref() {
            Some(controller) => controller.motor_temperatures(filter),
            None => vec![0.0; filter.axes().len()],
        })
    }

    /// Status of the whole stage.
    pub fn stage_status(&self) -> StatusMask {
        self.axis_status(-1)
    }

    /// Status for host axis index `axis` (`-1` for all). Empty before initialize
    /// or for an illegal index.
    pub fn axis_status(&self, axis: i32) -> StatusMask {
        match (self.filter(axis), self.controller.as_ref()) {
            (Some(filter), Some(controller)) => controller.axis_status(filter),
            _ => StatusMask::empty(),
        }
    }

    /// Acknowledge faults.
    pub fn fault_ack(&self) -> FaultAck {
        self.controller
            .as_ref()
            .map_or(FaultAck::Ok, StageController::fault_ack)
    }

    /// Text of the last fault.
    pub fn last_fault_text(&self) -> String {
        self.controller
            .as_ref()
            .map_or_else(|| NO_FAULT_TEXT.to_string(), StageController::last_fault_text)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn run<F>(&self, operation: &'static str, f: F) -> bool
    where
        F: FnOnce(&StageController) -> StageResult<()>,
    {
        let result = self
            .controller
            .as_ref()
            .ok_or(StageError::NotInitialized)
            .and_then(f);
        if let Err(e) = result {
            warn!(operation, error = %e, "Stage operation failed");
        }
        true
    }

    fn filter(&self, axis: i32) -> Option<AxisFilter> {
        match AxisFilter::try_from(axis) {
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!(error = %e, "Ignoring query");
                None
            }
        }
    }
}

fn default_connector(dry_run: bool) -> Box<dyn Connector> {
    if dry_run {
        return Box::new(NullConnector);
    }
    #[cfg(feature = "instrument_serial")]
    {
        Box::new(crate::transport::SerialConnector)
    }
    #[cfg(not(feature = "instrument_serial"))]
    {
        warn!("Built without serial support, running dry");
        Box::new(NullConnector)
    }
}
