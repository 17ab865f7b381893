//! Stage controller: simulation, encoding and transport behind one handle.
//!
//! [`StageController`] is created by a successful [`StageController::initialize`]
//! and dropped at shutdown. It is `Sync`: the host calls position queries and
//! moves from different threads, so the axis state sits behind a mutex and a
//! move records its start position and new demands in one critical section.
//!
//! Locks are never held across the blocking wait of a V8849 rotary move, so a
//! concurrent `position` or `halt` is served while the motor turns.

use crate::axis::{AxisFamily, AxisId};
use crate::encoder::{MotionEncoder, VelocitySetup};
use crate::error::StageResult;
use crate::profile::{Encoding, HaltPolicy, StageConfig};
use crate::settings::PluginSettings;
use crate::state::StageState;
use crate::status::{derive_status, AxisFilter, StatusMask};
use crate::transport::{Connector, LineTransport};
use crate::wait::{MoveWait, WaitOutcome};
use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Text reported when no fault is active.
pub const NO_FAULT_TEXT: &str = "Fault?  What fault?";

/// Result of a fault acknowledge, as the host numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FaultAck {
    /// Fault cleared.
    Ok = 0,
    /// Fault cannot be cleared; the host should shut down.
    Fatal = 1,
    /// Try again.
    Retry = 2,
}

impl FaultAck {
    /// Host return code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

struct Link {
    main: Box<dyn LineTransport>,
    control: Option<Box<dyn LineTransport>>,
}

/// A running stage session.
pub struct StageController {
    config: StageConfig,
    settings: PluginSettings,
    state: Mutex<StageState>,
    link: Mutex<Link>,
    encoder: Box<dyn MotionEncoder>,
    rotary_speed: Option<f64>,
    wait: MoveWait,
}

impl std::fmt::Debug for StageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageController")
            .field("variant", &self.config.variant)
            .field("protocol", &self.encoder.protocol())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl StageController {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the transports and bring the controller up.
    ///
    /// Fails without side effects on the caller's state if a port cannot be
    /// opened or the setup commands cannot be written.
    #[instrument(skip_all, fields(variant = %config.variant, port = %config.endpoint), err)]
    pub fn initialize(
        config: StageConfig,
        connector: &dyn Connector,
        settings: &PluginSettings,
    ) -> StageResult<Self> {
        let config = config.with_settings(settings);
        let encoder = config.encoder();

        let main = connector.open(&config.endpoint)?;
        let control = match &config.control_endpoint {
            Some(endpoint) => Some(connector.open(endpoint)?),
            None => None,
        };

        let rotary_speed = match config.encoding {
            Encoding::V8849 {
                steps_per_rev,
                speed_deg_s,
            } => {
                let setup = VelocitySetup::for_speed(speed_deg_s, steps_per_rev);
                if (setup.effective_speed - speed_deg_s).abs() > 1e-9 {
                    info!(
                        requested = speed_deg_s,
                        effective = setup.effective_speed,
                        prescale = setup.prescale,
                        cvel = setup.cvel,
                        "Rotary speed adjusted to board resolution"
                    );
                }
                Some(setup.effective_speed)
            }
            Encoding::StepDir => None,
        };

        let controller = Self {
            state: Mutex::new(StageState::new(config.axes, settings.limits_by_axis())),
            link: Mutex::new(Link { main, control }),
            encoder,
            rotary_speed,
            wait: MoveWait::new(),
            settings: settings.clone(),
            config,
        };

        {
            let mut link = controller.link.lock();
            for command in controller.encoder.setup_commands() {
                controller.send(&mut link, &command)?;
            }
            // motor current stays off until something has to move
            if let Some(control) = link.control.as_mut() {
                control.set_control_line(false)?;
            }
        }

        info!(
            linear_axes = controller.config.linear_count(),
            rotary_axes = controller.config.rotary_count(),
            protocol = controller.encoder.protocol(),
            rounding = ?controller.config.rounding,
            "Stage initialized"
        );
        Ok(controller)
    }

    /// Switch motor current off and release the ports.
    #[instrument(skip(self), fields(variant = %self.config.variant))]
    pub fn shutdown(self) {
        self.wait.cancel();
        let mut link = self.link.lock();
        if let Some(control) = link.control.as_mut() {
            if let Err(e) = control.set_control_line(false) {
                warn!(error = %e, "Could not switch motor current off at shutdown");
            }
        }
        info!("Stage shut down");
    }

    /// Parsed configuration, with settings overrides applied.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Copy of the current simulation state.
    pub fn snapshot(&self) -> StageState {
        self.state.lock().clone()
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Record new targets for a family and send the move.
    ///
    /// The family is advanced first, so a move issued before the host polled
    /// is encoded from where the previous one landed.
    ///
    /// Returns as soon as the command is written, except for controllers that
    /// cannot report completion (V8849 rotary moves): those hold the caller for
    /// the expected travel time, bounded by settings and cut short by [`halt`].
    ///
    /// [`halt`]: StageController::halt
    #[instrument(skip(self), fields(variant = %self.config.variant), err)]
    pub fn move_to(&self, family: AxisFamily, targets: [f64; 3]) -> StageResult<()> {
        let (command, start, demands) = {
            let mut state = self.state.lock();
            // step/dir counts are relative: settle any earlier move first
            let start = state.advance(family, self.config.rounding, self.config.tolerance);
            state.set_demands(family, targets);
            (
                self.encoder.encode_move(&state, family),
                start,
                state.demands(family),
            )
        };

        let Some(command) = command else {
            debug!("Nothing to send for this family");
            return Ok(());
        };

        if !self.encoder.blocks_on_move(family) {
            let mut link = self.link.lock();
            return self.send(&mut link, &command);
        }

        {
            let mut link = self.link.lock();
            self.set_control(&mut link, true)?;
            self.send(&mut link, &command)?;
        }

        let travel = self.travel_time(&start, &demands);
        debug!(travel_ms = travel.as_millis() as u64, "Waiting for move to complete");
        if self.wait.wait(travel) == WaitOutcome::Cancelled {
            info!("Blocking move cut short by halt");
        }

        let mut link = self.link.lock();
        self.set_control(&mut link, false)
    }

    fn travel_time(&self, start: &[f64; 3], demands: &[f64; 3]) -> Duration {
        let distance = start
            .iter()
            .zip(demands)
            .map(|(a, b)| (b - a).abs())
            .fold(0.0, f64::max);
        let cap = self.settings.max_blocking_wait();
        let seconds = match self.rotary_speed {
            Some(speed) if speed > 0.0 => distance / speed,
            _ => 0.0,
        };
        if !seconds.is_finite() || seconds >= cap.as_secs_f64() {
            return cap;
        }
        (Duration::from_secs_f64(seconds) + self.settings.settle_margin()).min(cap)
    }

    /// Advance the simulation and return the positions of a family.
    pub fn position(&self, family: AxisFamily) -> [f64; 3] {
        self.state
            .lock()
            .advance(family, self.config.rounding, self.config.tolerance)
    }

    /// Redefine the positions of a family without moving.
    #[instrument(skip(self), fields(variant = %self.config.variant), err)]
    pub fn set_origin(&self, family: AxisFamily, positions: [f64; 3]) -> StageResult<()> {
        let command = {
            let mut state = self.state.lock();
            state.set_origin(family, positions);
            self.encoder.encode_origin(&state, family)
        };
        match command {
            Some(command) => {
                let mut link = self.link.lock();
                self.send(&mut link, &command)
            }
            None => Ok(()),
        }
    }

    /// Stop: end any blocking wait and, depending on the variant, drop pending targets.
    #[instrument(skip(self), fields(variant = %self.config.variant))]
    pub fn halt(&self) {
        self.wait.cancel();
        match self.config.halt {
            HaltPolicy::HoldPosition => {
                self.state.lock().hold_all();
                info!("Halted, demands reset to simulated positions");
            }
            HaltPolicy::Ignore => debug!("Halt has no effect on this stage"),
        }
    }

    /// Store host speeds for a family. No kinematics are derived from them.
    pub fn set_speed(&self, family: AxisFamily, speed: [f64; 3]) {
        self.state.lock().set_speed(family, speed);
    }

    /// Store host accelerations for a family.
    pub fn set_accel(&self, family: AxisFamily, accel: [f64; 3]) {
        self.state.lock().set_accel(family, accel);
    }

    // =========================================================================
    // Power and status
    // =========================================================================

    /// Set the power flag and, where fitted, switch motor current.
    #[instrument(skip(self), fields(variant = %self.config.variant), err)]
    pub fn power_on(&self, enabled: bool) -> StageResult<()> {
        self.state.lock().set_power(enabled);
        let mut link = self.link.lock();
        self.set_control(&mut link, enabled)
    }

    /// Status word for the selected axes.
    pub fn axis_status(&self, filter: AxisFilter) -> StatusMask {
        derive_status(&self.state.lock(), self.config.tolerance, filter)
    }

    /// Status word for the whole stage.
    pub fn stage_status(&self) -> StatusMask {
        self.axis_status(AxisFilter::All)
    }

    /// Clear soft-limit excursions by clamping back into range.
    #[instrument(skip(self), fields(variant = %self.config.variant))]
    pub fn fault_ack(&self) -> FaultAck {
        let cleared = self.state.lock().clear_excursions();
        if !cleared.is_empty() {
            info!(axes = ?cleared, "Soft-limit excursion cleared");
        }
        FaultAck::Ok
    }

    /// Description of the active fault.
    pub fn last_fault_text(&self) -> String {
        let axes = self.state.lock().excursions();
        if axes.is_empty() {
            return NO_FAULT_TEXT.to_string();
        }
        let names: Vec<&str> = axes.iter().map(|id| id.name()).collect();
        format!("Soft limit exceeded on {}", names.join(", "))
    }

    /// Simulated motor temperatures, °C, one per selected axis.
    pub fn motor_temperatures(&self, filter: AxisFilter) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        filter
            .axes()
            .into_iter()
            .map(|_: AxisId| 25.0 + 0.01 * f64::from(rng.gen_range(0..500u32)))
            .collect()
    }

    // =========================================================================
    // Wire helpers
    // =========================================================================

    fn send(&self, link: &mut Link, command: &str) -> StageResult<()> {
        if self.settings.echo_commands {
            info!(command = command.trim_end(), "Sending");
        } else {
            debug!(command = command.trim_end(), "Sending");
        }
        link.main.write_line(command)
    }

    fn set_control(&self, link: &mut Link, enabled: bool) -> StageResult<()> {
        match link.control.as_mut() {
            Some(control) => {
                debug!(enabled, "Motor current");
                control.set_control_line(enabled)
            }
            None => Ok(()),
        }
    }
}
