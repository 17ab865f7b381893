//! # OMDAQ XYZ Stage Plugin Core
//!
//! This crate implements the stage-control side of an XYZ/rotary stage plugin
//! for a closed data-acquisition host. The stepper controllers it drives give no
//! position feedback, so the plugin simulates where the stage must be from the
//! commands it sent and the known step size of each axis, and reports motion
//! status from that simulation.
//!
//! ## Crate Structure
//!
//! - **`axis`**: per-axis step metrics, soft limits and the `AxisState::advance`
//!   convergence step.
//! - **`state`**: `StageState`, the aggregate of all six axes plus the power flag.
//! - **`encoder`**: the `MotionEncoder` trait with the step/dir tuple and V8849
//!   command-language encodings.
//! - **`status`**: status word and capability flags (`bitflags`), and
//!   `derive_status`.
//! - **`transport`**: `LineTransport`/`Connector` traits with serial, dry-run and
//!   recording implementations.
//! - **`profile`**: the stage variants (universal, two-axis, tomography), their
//!   option dialogs and option parsing into a `StageConfig`.
//! - **`wait`**: the bounded, cancellable wait used by blocking rotary moves.
//! - **`controller`**: `StageController`, which orchestrates the above for one
//!   session.
//! - **`session`**: `PluginSession`, the host entry-point facade.
//! - **`settings`**: Figment-based `PluginSettings` (TOML file + environment).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `StageError` and `StageResult`.

pub mod axis;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod profile;
pub mod session;
pub mod settings;
pub mod state;
pub mod status;
pub mod transport;
pub mod wait;

pub use controller::{FaultAck, StageController};
pub use error::{StageError, StageResult};
pub use profile::{StageConfig, Variant};
pub use session::PluginSession;
