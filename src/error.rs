//! Custom error types for the stage plugin.
//!
//! This module defines the primary error type, `StageError`. Using the `thiserror`
//! crate, it provides a single place to describe everything that can go wrong
//! while bringing a stage session up or talking to the motor controller.
//!
//! ## Error Hierarchy
//!
//! - **`OptionCount`** / **`InvalidOption`**: the host supplied an option list that
//!   does not match the variant (wrong count, unparseable number, bad serial mode).
//!   Initialization fails and no state is kept.
//! - **`TransportOpen`**: the serial port (or the noise-control port) could not be
//!   opened. Initialization fails the same way.
//! - **`Transport`**: an I/O error while writing a command line or driving the
//!   control line after the session is up.
//! - **`Settings`**: the settings file or environment could not be extracted, or
//!   failed validation. **`SettingsRender`** covers the reverse direction.
//! - **`Logging`**: the tracing subscriber could not be installed.
//! - **`InvalidAxisIndex`**: an axis filter outside `-1..=5`.
//! - **`NotInitialized`**: a motion entry point was called before `initialize`.
//!
//! Soft-limit excursions are not errors: they are reported through the status
//! mask and cleared by a fault acknowledge.

use thiserror::Error;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Errors raised by stage configuration, transport and controller operations.
#[derive(Error, Debug)]
pub enum StageError {
    /// The host passed a different number of option strings than the variant declares.
    #[error("Expected {expected} options, got {actual}")]
    OptionCount {
        /// Option count declared by the variant.
        expected: usize,
        /// Option count supplied by the host.
        actual: usize,
    },

    /// An option string could not be interpreted.
    #[error("Invalid value '{value}' for option '{name}': {reason}")]
    InvalidOption {
        /// Option header, e.g. `Baud`.
        name: String,
        /// Raw value as supplied.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A serial port could not be opened.
    #[error("Failed to open serial port {port}: {source}")]
    TransportOpen {
        /// Port name as handed to the OS.
        port: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while the session is running.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Settings could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Settings could not be rendered as TOML.
    #[error("Settings serialization error: {0}")]
    SettingsRender(#[from] toml::ser::Error),

    /// Settings were loaded but are semantically wrong.
    #[error("Settings validation error: {0}")]
    SettingsValidation(String),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Axis filter outside the legal range.
    #[error("Invalid axis index {0}; expected -1 (all) or 0-5")]
    InvalidAxisIndex(i32),

    /// A session operation was called before a successful `initialize`.
    #[error("Stage not initialized")]
    NotInitialized,
}

impl StageError {
    /// Shorthand for [`StageError::InvalidOption`].
    pub fn invalid_option(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StageError::InvalidOption {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error belongs to the configuration class (bad host options).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StageError::OptionCount { .. } | StageError::InvalidOption { .. }
        )
    }
}

impl From<figment::Error> for StageError {
    fn from(value: figment::Error) -> Self {
        StageError::Settings(Box::new(value))
    }
}
