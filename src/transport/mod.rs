//! Line-oriented serial transport to the motor controller.
//!
//! The controller core only ever writes complete command lines and, on one
//! variant, toggles a control line (DTR) that switches motor current. Reading is
//! never needed: the firmwares send no replies.
//!
//! - [`SerialConnector`] opens real RS-232 ports (feature `instrument_serial`).
//! - [`NullConnector`] opens nothing and logs the traffic (dry run).
//! - [`mock::MockConnector`] records the traffic for tests.

pub mod mock;
#[cfg(feature = "instrument_serial")]
mod serial;

#[cfg(feature = "instrument_serial")]
pub use serial::SerialConnector;

use crate::error::StageResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Parity setting of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Character framing, written as e.g. `8N1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMode {
    /// 5 to 8.
    pub data_bits: u8,
    /// Parity.
    pub parity: Parity,
    /// 1 or 2.
    pub stop_bits: u8,
}

impl Default for LineMode {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl FromStr for LineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.trim().chars().collect();
        let &[data, parity, stop] = chars.as_slice() else {
            return Err("expected <data bits><parity><stop bits>, e.g. 8N1".to_string());
        };
        let data_bits = match data {
            '5'..='8' => data as u8 - b'0',
            _ => return Err(format!("data bits must be 5-8, got '{}'", data)),
        };
        let parity = match parity.to_ascii_uppercase() {
            'N' => Parity::None,
            'E' => Parity::Even,
            'O' => Parity::Odd,
            other => return Err(format!("parity must be N, E or O, got '{}'", other)),
        };
        let stop_bits = match stop {
            '1' => 1,
            '2' => 2,
            _ => return Err(format!("stop bits must be 1 or 2, got '{}'", stop)),
        };
        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for LineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(f, "{}{}{}", self.data_bits, parity, self.stop_bits)
    }
}

/// Where and how to open a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialEndpoint {
    /// Zero-based port number (host `COM5` is index 4).
    pub index: u32,
    /// Baud rate.
    pub baud: u32,
    /// Framing.
    pub mode: LineMode,
}

impl SerialEndpoint {
    /// OS device name for the port.
    pub fn port_name(&self) -> String {
        if cfg!(windows) {
            format!("COM{}", self.index + 1)
        } else {
            format!("/dev/ttyS{}", self.index)
        }
    }
}

impl fmt::Display for SerialEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.port_name(), self.baud, self.mode)
    }
}

/// An open, write-only command channel.
pub trait LineTransport: Send {
    /// Write one command. The text carries its own terminator.
    fn write_line(&mut self, line: &str) -> StageResult<()>;

    /// Drive the auxiliary control line (DTR). Ignored by transports without one.
    fn set_control_line(&mut self, _enabled: bool) -> StageResult<()> {
        Ok(())
    }
}

/// Opens transports for endpoints.
pub trait Connector: Send + Sync {
    /// Open the port described by `endpoint`.
    fn open(&self, endpoint: &SerialEndpoint) -> StageResult<Box<dyn LineTransport>>;
}

/// Connector for dry runs: nothing is opened, every command is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConnector;

impl Connector for NullConnector {
    fn open(&self, endpoint: &SerialEndpoint) -> StageResult<Box<dyn LineTransport>> {
        info!(port = %endpoint, "Dry run: serial port not opened");
        Ok(Box::new(NullTransport {
            port: endpoint.port_name(),
        }))
    }
}

struct NullTransport {
    port: String,
}

impl LineTransport for NullTransport {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        info!(port = %self.port, command = line.trim_end(), "Dry run: command not sent");
        Ok(())
    }

    fn set_control_line(&mut self, enabled: bool) -> StageResult<()> {
        info!(port = %self.port, enabled, "Dry run: control line not driven");
        Ok(())
    }
}
