use super::{Connector, LineMode, LineTransport, Parity, SerialEndpoint};
use crate::error::{StageError, StageResult};
use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens RS-232 ports through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, endpoint: &SerialEndpoint) -> StageResult<Box<dyn LineTransport>> {
        let port_name = endpoint.port_name();
        let port = serialport::new(&port_name, endpoint.baud)
            .data_bits(data_bits(endpoint.mode))
            .parity(parity(endpoint.mode))
            .stop_bits(stop_bits(endpoint.mode))
            .flow_control(FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| StageError::TransportOpen {
                port: port_name.clone(),
                source: e.into(),
            })?;

        info!(port = %endpoint, "Opened serial port");
        Ok(Box::new(SerialLine { port, port_name }))
    }
}

struct SerialLine {
    port: Box<dyn SerialPort>,
    port_name: String,
}

impl LineTransport for SerialLine {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.flush()?;
        debug!(port = %self.port_name, bytes = line.len(), "Wrote command");
        Ok(())
    }

    fn set_control_line(&mut self, enabled: bool) -> StageResult<()> {
        self.port
            .write_data_terminal_ready(enabled)
            .map_err(std::io::Error::from)?;
        debug!(port = %self.port_name, enabled, "Set DTR");
        Ok(())
    }
}

fn data_bits(mode: LineMode) -> DataBits {
    match mode.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn parity(mode: LineMode) -> serialport::Parity {
    match mode.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn stop_bits(mode: LineMode) -> StopBits {
    if mode.stop_bits == 2 {
        StopBits::Two
    } else {
        StopBits::One
    }
}
