//! Byte-level link to the controller.
//!
//! [`Transport`] is the seam between the session and the physical port. The
//! real implementation wraps a `serialport` handle; [`SimulatedTransport`]
//! stands in when the port cannot be opened so the rest of the session keeps
//! running without I/O.

use std::io::{self, Read, Write};

use log::{info, warn};

use crate::config::{Config, SIMULATION_PORT};
use crate::error::{Error, Result};

/// Exclusive, blocking byte transport to the controller.
pub trait Transport {
    /// Returns whatever bytes the port has buffered, possibly none.
    ///
    /// A read that times out yields the bytes received so far rather than an error.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Writes the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Releases the port. Further calls are not expected.
    fn close(&mut self) -> io::Result<()>;
}

/// A serial port opened with `serialport`.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Opens `port_name` with the baud rate and read timeout from `config`.
    pub fn open(port_name: &str, config: &Config) -> Result<Self> {
        let baud = u32::from(config.baud_rate);
        let port = serialport::new(port_name, baud)
            .timeout(config.timeout())
            .open()
            .map_err(|e| Error::ConnectionFailed {
                port: port_name.to_string(),
                baud,
                reason: e.to_string(),
            })?;
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let pending = self.port.bytes_to_read()? as usize;
        let mut buf = vec![0; pending];
        if pending == 0 {
            return Ok(buf);
        }
        match self.port.read(&mut buf) {
            Ok(n) => buf.truncate(n),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => buf.clear(),
            Err(e) => return Err(e),
        }
        Ok(buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // serialport closes the handle on drop; make sure nothing is left queued.
        self.port.flush()
    }
}

/// The no-I/O stand-in used in simulation mode.
///
/// Writes are accepted and discarded; reads always return an empty buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedTransport;

impl Transport for SimulatedTransport {
    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Whether a session talks to hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Connected,
    Simulation,
}

/// The transport a live session owns: a real port, or simulation.
pub enum Link {
    Serial(SerialTransport),
    /// Entered when the port was named `Simulation`, none was found, or it failed to open.
    Simulation {
        transport: SimulatedTransport,
        reason: String,
    },
}

impl Link {
    /// Opens the configured port, falling back to simulation on any failure.
    ///
    /// Never fails: a connection error is logged and reported through
    /// [`Link::mode`] and [`Link::simulation_reason`] instead.
    pub fn open(config: &Config) -> Self {
        let port_name = match config.port.clone().or_else(detect_port) {
            Some(name) => name,
            None => return Self::simulation("no serial ports found".into()),
        };
        if port_name == SIMULATION_PORT {
            return Self::simulation("simulation selected".into());
        }

        match SerialTransport::open(&port_name, config) {
            Ok(transport) => {
                info!("opened {} at {} baud", port_name, config.baud_rate);
                Link::Serial(transport)
            }
            Err(e) => {
                warn!("{}. Entering simulation mode.", e);
                Self::simulation(e.to_string())
            }
        }
    }

    fn simulation(reason: String) -> Self {
        Link::Simulation {
            transport: SimulatedTransport,
            reason,
        }
    }

    pub fn mode(&self) -> LinkMode {
        match self {
            Link::Serial(_) => LinkMode::Connected,
            Link::Simulation { .. } => LinkMode::Simulation,
        }
    }

    pub fn simulation_reason(&self) -> Option<&str> {
        match self {
            Link::Serial(_) => None,
            Link::Simulation { reason, .. } => Some(reason),
        }
    }

    /// Port name, or `Simulation`.
    pub fn port_name(&self) -> &str {
        match self {
            Link::Serial(transport) => transport.name(),
            Link::Simulation { .. } => SIMULATION_PORT,
        }
    }
}

impl Transport for Link {
    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        match self {
            Link::Serial(t) => t.read_available(),
            Link::Simulation { transport, .. } => transport.read_available(),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Link::Serial(t) => t.write_all(bytes),
            Link::Simulation { transport, .. } => transport.write_all(bytes),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            Link::Serial(t) => t.close(),
            Link::Simulation { transport, .. } => transport.close(),
        }
    }
}

/// A serial port as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub name: String,
    pub description: String,
}

/// Lists the serial ports on this machine.
pub fn list_ports() -> Result<Vec<PortEntry>> {
    let ports = serialport::available_ports().map_err(|e| Error::Io(e.into()))?;
    Ok(ports
        .into_iter()
        .map(|p| PortEntry {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let mut parts = Vec::new();
            if let Some(manufacturer) = &usb.manufacturer {
                parts.push(manufacturer.clone());
            }
            if let Some(product) = &usb.product {
                parts.push(product.clone());
            }
            if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                parts.join(" ")
            }
        }
        serialport::SerialPortType::PciPort => "PCI".into(),
        serialport::SerialPortType::BluetoothPort => "Bluetooth".into(),
        serialport::SerialPortType::Unknown => "Unknown".into(),
    }
}

/// Picks the port an Arduino is most likely on.
pub fn preferred_port(ports: &[PortEntry]) -> Option<&PortEntry> {
    ports
        .iter()
        .find(|p| p.description.contains("Arduino"))
        .or_else(|| ports.first())
}

fn detect_port() -> Option<String> {
    match list_ports() {
        Ok(ports) => preferred_port(&ports).map(|p| p.name.clone()),
        Err(e) => {
            warn!("could not enumerate serial ports: {}", e);
            None
        }
    }
}

/// Scripted transport for exercising sessions without hardware.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::io;

    use super::Transport;

    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        /// Buffers handed out by successive reads; empty once exhausted.
        pub reads: VecDeque<Vec<u8>>,
        /// Every buffer written, in order.
        pub written: Vec<Vec<u8>>,
        pub closed: bool,
        /// Makes the next read fail with this error kind.
        pub fail_next_read: Option<io::ErrorKind>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_read(&mut self, bytes: &[u8]) {
            self.reads.push_back(bytes.to_vec());
        }

        pub fn written_text(&self) -> Vec<String> {
            self.written
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            if let Some(kind) = self.fail_next_read.take() {
                return Err(io::Error::new(kind, "scripted failure"));
            }
            Ok(self.reads.pop_front().unwrap_or_default())
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            self.written.push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, description: &str) -> PortEntry {
        PortEntry {
            name: name.into(),
            description: description.into(),
        }
    }

    #[test]
    fn preferred_port_favours_arduino() {
        let ports = [
            entry("/dev/ttyS0", "PCI"),
            entry("/dev/ttyUSB0", "FTDI FT232R"),
            entry("/dev/ttyACM0", "Arduino (www.arduino.cc) Arduino Uno"),
        ];
        assert_eq!(preferred_port(&ports).unwrap().name, "/dev/ttyACM0");
    }

    #[test]
    fn preferred_port_falls_back_to_first() {
        let ports = [entry("/dev/ttyS0", "PCI"), entry("/dev/ttyUSB0", "FTDI")];
        assert_eq!(preferred_port(&ports).unwrap().name, "/dev/ttyS0");
        assert!(preferred_port(&[]).is_none());
    }

    #[test]
    fn unreachable_port_enters_simulation() {
        let config = Config {
            port: Some("/dev/tempctl-does-not-exist".into()),
            ..Config::default()
        };
        let mut link = Link::open(&config);
        assert_eq!(link.mode(), LinkMode::Simulation);
        assert!(link.simulation_reason().unwrap().contains("/dev/tempctl-does-not-exist"));
        assert_eq!(link.port_name(), SIMULATION_PORT);

        // Simulation swallows I/O.
        link.write_all(b"101,20,120000,10,101,20,120000,10").unwrap();
        assert!(link.read_available().unwrap().is_empty());
        link.close().unwrap();
    }

    #[test]
    fn simulation_port_name_skips_serial() {
        let config = Config {
            port: Some(SIMULATION_PORT.into()),
            ..Config::default()
        };
        let link = Link::open(&config);
        assert_eq!(link.mode(), LinkMode::Simulation);
        assert_eq!(link.simulation_reason(), Some("simulation selected"));
    }
}
