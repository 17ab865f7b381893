//! Recording transport for tests.
//!
//! [`MockConnector`] hands out transports that append every write to a shared
//! event log, so a test can keep a clone of the connector and assert on the exact
//! wire traffic after driving a controller. Like a real serial port, a mock port
//! can be held by one transport at a time.
//!
//! ```
//! use omxyz_stage::transport::mock::{MockConnector, TransportEvent};
//! use omxyz_stage::transport::{Connector, LineMode, SerialEndpoint};
//!
//! let connector = MockConnector::new();
//! let endpoint = SerialEndpoint { index: 4, baud: 9600, mode: LineMode::default() };
//! let mut port = connector.open(&endpoint).unwrap();
//! port.write_line("new\n").unwrap();
//! assert_eq!(connector.lines(4), vec!["new\n"]);
//! ```

use super::{Connector, LineTransport, SerialEndpoint};
use crate::error::{StageError, StageResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// One observed transport action.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A port was opened.
    Opened {
        /// Zero-based port index.
        port: u32,
        /// Baud rate requested.
        baud: u32,
    },
    /// A command was written.
    Line {
        /// Zero-based port index.
        port: u32,
        /// Text including terminator.
        text: String,
    },
    /// The control line was driven.
    Control {
        /// Zero-based port index.
        port: u32,
        /// New level.
        enabled: bool,
    },
}

#[derive(Debug, Default)]
struct Shared {
    events: Vec<TransportEvent>,
    refuse: HashSet<u32>,
    open: HashSet<u32>,
    fail_writes: bool,
}

/// Connector that records instead of touching hardware.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
}

impl MockConnector {
    /// Empty log, every port opens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opening `port` fail as if the device were missing.
    pub fn refuse_port(self, port: u32) -> Self {
        self.shared.lock().refuse.insert(port);
        self
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    /// Everything observed so far.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.shared.lock().events.clone()
    }

    /// Lines written to `port`, in order.
    pub fn lines(&self, port: u32) -> Vec<String> {
        self.shared
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Line { port: p, text } if *p == port => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Control-line levels driven on `port`, in order.
    pub fn control_levels(&self, port: u32) -> Vec<bool> {
        self.shared
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Control { port: p, enabled } if *p == port => Some(*enabled),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.shared.lock().events.clear();
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &SerialEndpoint) -> StageResult<Box<dyn LineTransport>> {
        let mut shared = self.shared.lock();
        if shared.refuse.contains(&endpoint.index) {
            return Err(StageError::TransportOpen {
                port: endpoint.port_name(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock port refused"),
            });
        }
        if !shared.open.insert(endpoint.index) {
            return Err(StageError::TransportOpen {
                port: endpoint.port_name(),
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "mock port already open",
                ),
            });
        }
        shared.events.push(TransportEvent::Opened {
            port: endpoint.index,
            baud: endpoint.baud,
        });
        Ok(Box::new(MockLine {
            port: endpoint.index,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockLine {
    port: u32,
    shared: Arc<Mutex<Shared>>,
}

impl MockLine {
    fn record(&self, event: TransportEvent) -> StageResult<()> {
        let mut shared = self.shared.lock();
        if shared.fail_writes {
            return Err(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock write failure").into(),
            );
        }
        shared.events.push(event);
        Ok(())
    }
}

impl Drop for MockLine {
    fn drop(&mut self) {
        self.shared.lock().open.remove(&self.port);
    }
}

impl LineTransport for MockLine {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        self.record(TransportEvent::Line {
            port: self.port,
            text: line.to_string(),
        })
    }

    fn set_control_line(&mut self, enabled: bool) -> StageResult<()> {
        self.record(TransportEvent::Control {
            port: self.port,
            enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LineMode;

    fn endpoint(index: u32) -> SerialEndpoint {
        SerialEndpoint {
            index,
            baud: 9600,
            mode: LineMode::default(),
        }
    }

    #[test]
    fn records_per_port() {
        let connector = MockConnector::new();
        let mut a = connector.open(&endpoint(1)).unwrap();
        let mut b = connector.open(&endpoint(2)).unwrap();
        a.write_line("one\n").unwrap();
        b.set_control_line(true).unwrap();
        b.write_line("two\n").unwrap();

        assert_eq!(connector.lines(1), vec!["one\n"]);
        assert_eq!(connector.lines(2), vec!["two\n"]);
        assert_eq!(connector.control_levels(2), vec![true]);
        assert_eq!(connector.events().len(), 5);
    }

    #[test]
    fn refused_ports_fail_to_open() {
        let connector = MockConnector::new().refuse_port(3);
        assert!(matches!(
            connector.open(&endpoint(3)),
            Err(StageError::TransportOpen { .. })
        ));
        assert!(connector.events().is_empty());
    }

    #[test]
    fn ports_are_exclusive_until_dropped() {
        let connector = MockConnector::new();
        let first = connector.open(&endpoint(2)).unwrap();
        assert!(matches!(
            connector.open(&endpoint(2)),
            Err(StageError::TransportOpen { .. })
        ));

        drop(first);
        assert!(connector.open(&endpoint(2)).is_ok());
        assert_eq!(connector.events().len(), 2);
    }

    #[test]
    fn write_failures_surface_as_transport_errors() {
        let connector = MockConnector::new();
        let mut line = connector.open(&endpoint(0)).unwrap();
        connector.fail_writes(true);
        assert!(matches!(line.write_line("x\n"), Err(StageError::Transport(_))));
    }
}
