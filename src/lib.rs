//! # tempctl
//!
//! Host-side link to a two-channel Arduino PID temperature controller.
//!
//! The controller takes its regulation parameters as one comma-separated
//! line of fixed-point integers and reports, once per poll, the temperature,
//! heater output and PID terms of both channels (plus a sample thermometer
//! on some builds). This library encodes the former, decodes the latter and
//! wraps both in a [`Session`] that owns the serial port.

pub mod config;
pub mod error;
pub mod history;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{BaudRate, Config, SIMULATION_PORT};
pub use error::{DecodeFailure, Error, Result};
pub use history::{History, Sample};
pub use protocol::{
    decode_telemetry, encode_command, parse_command, ChannelReading, ChannelSetpoint, ProtocolVariant,
    ScaledParameters, TelemetryFrame, CHANNEL_COUNT, LINE_DELIMITER,
};
pub use session::{PollTimer, Session, TickOutcome};
pub use transport::{list_ports, preferred_port, Link, LinkMode, PortEntry, SerialTransport, SimulatedTransport, Transport};
