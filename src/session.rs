//! One connection to the controller, from connect to disconnect.
//!
//! The session owns the transport, the parameters last sent to each channel
//! and the last accepted telemetry frame. It is driven from a single thread:
//! user edits call [`Session::set_channel`], and a [`PollTimer`] decides when
//! to call [`Session::tick`].

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::Config;
use crate::error::{DecodeFailure, Error, Result};
use crate::history::History;
use crate::protocol::{decode_telemetry, encode_command, ChannelSetpoint, ProtocolVariant, TelemetryFrame, CHANNEL_COUNT};
use crate::transport::{Link, LinkMode, Transport};

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A complete packet arrived and replaced the displayed values.
    Updated(TelemetryFrame),
    /// The packet was rejected; the previous values stay on display.
    Skipped(DecodeFailure),
}

pub struct Session<T: Transport> {
    transport: T,
    mode: LinkMode,
    config: Config,
    setpoints: [ChannelSetpoint; CHANNEL_COUNT],
    latest: Option<TelemetryFrame>,
    history: History,
    started: Instant,
    ticks: u64,
    skipped: u64,
}

impl Session<Link> {
    /// Opens the configured port (or enters simulation) and sends the
    /// configured parameters.
    ///
    /// Only a failed first write is reported; a port that cannot be opened
    /// is not an error.
    pub fn connect(config: &Config) -> Result<Self> {
        let link = Link::open(config);
        let mode = link.mode();
        if mode == LinkMode::Connected {
            // Opening the port resets the Arduino; give setup() time to finish.
            std::thread::sleep(config.reset_delay());
        }
        let mut session = Session::with_transport(link, mode, config.clone());
        session.send_parameters()?;
        Ok(session)
    }

    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    pub fn simulation_reason(&self) -> Option<&str> {
        self.transport.simulation_reason()
    }
}

impl<T: Transport> Session<T> {
    /// Wraps an already open transport. No command is sent.
    pub fn with_transport(transport: T, mode: LinkMode, config: Config) -> Self {
        let setpoints = config.channels.map(|sp| config.clamp(sp));
        Self {
            transport,
            mode,
            history: History::new(config.history_capacity),
            config,
            setpoints,
            latest: None,
            started: Instant::now(),
            ticks: 0,
            skipped: 0,
        }
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.config.variant
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn setpoints(&self) -> &[ChannelSetpoint; CHANNEL_COUNT] {
        &self.setpoints
    }

    /// Last accepted frame, if any packet has decoded since connect.
    pub fn latest(&self) -> Option<&TelemetryFrame> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Encodes the current parameters and writes them to the controller.
    pub fn send_parameters(&mut self) -> Result<()> {
        let command = encode_command(&self.setpoints, self.config.variant)?;
        self.write_command(&command)
    }

    /// Replaces one channel's parameters and sends the full command.
    ///
    /// Values are clamped to the instrument's limits first. A non-finite
    /// value is rejected and nothing is stored or sent.
    pub fn set_channel(&mut self, channel: usize, setpoint: ChannelSetpoint) -> Result<()> {
        if channel >= CHANNEL_COUNT {
            return Err(Error::InvalidInput {
                channel,
                field: "channel",
                value: channel as f64,
            });
        }
        let mut candidate = self.setpoints;
        candidate[channel] = self.config.clamp(setpoint);
        let command = encode_command(&candidate, self.config.variant)?;
        self.setpoints = candidate;
        self.write_command(&command)
    }

    fn write_command(&mut self, command: &str) -> Result<()> {
        info!("sending parameters: {}", command);
        self.transport.write_all(command.as_bytes())?;
        Ok(())
    }

    /// Runs one poll-decode-update cycle.
    ///
    /// Transport errors are returned; decode failures are not, they only
    /// leave [`Session::latest`] untouched.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.ticks += 1;
        let buffer = self.transport.read_available()?;
        debug!("read {:?}", String::from_utf8_lossy(&buffer));

        match decode_telemetry(&buffer, self.config.variant) {
            Ok(frame) => {
                self.latest = Some(frame);
                self.history.push(self.started.elapsed().as_secs_f64(), frame);
                Ok(TickOutcome::Updated(frame))
            }
            Err(Error::DecodeFailed(failure)) => {
                self.skipped += 1;
                debug!("skipping tick: {}", failure);
                Ok(TickOutcome::Skipped(failure))
            }
            Err(e) => Err(e),
        }
    }

    /// Closes the transport and hands back the recorded history.
    pub fn disconnect(mut self) -> Result<History> {
        self.transport.close()?;
        info!(
            "disconnected after {} ticks ({} skipped)",
            self.ticks, self.skipped
        );
        Ok(self.history)
    }
}

/// Fixed-interval poll scheduler that cannot re-fire while a cycle runs.
///
/// [`PollTimer::fire`] disarms the timer; it stays disarmed until
/// [`PollTimer::complete`] re-arms it one interval after the cycle ended.
#[derive(Debug, Clone)]
pub struct PollTimer {
    interval: Duration,
    next_due: Instant,
    in_flight: bool,
}

impl PollTimer {
    /// The first tick is due one interval after `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
            in_flight: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Returns `true` if a cycle should start now, and marks it in flight.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.in_flight || now < self.next_due {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Ends the current cycle and schedules the next.
    pub fn complete(&mut self, now: Instant) {
        self.in_flight = false;
        self.next_due = now + self.interval;
    }

    /// Time left until the next cycle; zero if due, the full interval while in flight.
    pub fn until_due(&self, now: Instant) -> Duration {
        if self.in_flight {
            return self.interval;
        }
        self.next_due.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use std::io;

    const GOOD: &[u8] = b"23.500,50.0,1.2,0.3,24.100,48.0,1.1,0.2\r\n";
    const SHORT: &[u8] = b"23.500,50.0,1.2,0.3,24.100,48.0,1.1\r\n";

    fn session() -> Session<ScriptedTransport> {
        Session::with_transport(ScriptedTransport::new(), LinkMode::Connected, Config::default())
    }

    #[test]
    fn send_parameters_writes_command() {
        let mut session = session();
        session.send_parameters().unwrap();
        assert_eq!(
            session.transport().written_text(),
            vec!["101,20,120000,10,101,20,120000,10"]
        );
    }

    #[test]
    fn trigger_variant_appends_trigger() {
        let config = Config {
            variant: ProtocolVariant::WITH_SAMPLE.with_trigger(true),
            ..Config::default()
        };
        let mut session = Session::with_transport(ScriptedTransport::new(), LinkMode::Connected, config);
        session.send_parameters().unwrap();
        assert!(session.transport().written_text()[0].ends_with(",10,a"));
    }

    #[test]
    fn set_channel_clamps_and_sends() {
        let config = Config {
            temperature_limit: 100.0,
            ..Config::default()
        };
        let mut session = Session::with_transport(ScriptedTransport::new(), LinkMode::Connected, config);
        session
            .set_channel(
                1,
                ChannelSetpoint {
                    setpoint_c: 150.0,
                    band_c: 2.0,
                    integral_time_s: 1.0,
                    rate_per_s: 0.5,
                },
            )
            .unwrap();
        assert_eq!(session.setpoints()[1].setpoint_c, 100.0);
        assert_eq!(
            session.transport().written_text(),
            vec!["101,20,120000,10,400,8,4000,50"]
        );
    }

    #[test]
    fn last_edit_wins() {
        let mut session = session();
        for setpoint_c in [30.0, 31.0, 32.0] {
            let edit = ChannelSetpoint {
                setpoint_c,
                ..ChannelSetpoint::default()
            };
            session.set_channel(0, edit).unwrap();
        }
        let written = session.transport().written_text();
        assert_eq!(written.len(), 3);
        assert!(written[2].starts_with("128,"));
        assert_eq!(session.setpoints()[0].setpoint_c, 32.0);
    }

    #[test]
    fn set_channel_rejects_nan_without_sending() {
        let mut session = session();
        let edit = ChannelSetpoint {
            integral_time_s: f64::NAN,
            ..ChannelSetpoint::default()
        };
        let result = session.set_channel(0, edit);
        assert!(matches!(result, Err(Error::InvalidInput { channel: 0, .. })));
        assert!(session.transport().written.is_empty());
        assert_eq!(session.setpoints()[0], ChannelSetpoint::default());
    }

    #[test]
    fn set_channel_rejects_unknown_channel() {
        let mut session = session();
        let result = session.set_channel(2, ChannelSetpoint::default());
        assert!(matches!(result, Err(Error::InvalidInput { channel: 2, .. })));
    }

    #[test]
    fn tick_updates_latest_and_history() {
        let mut session = session();
        session.transport.push_read(GOOD);
        match session.tick().unwrap() {
            TickOutcome::Updated(frame) => assert_eq!(frame.channels[1].temperature_c, 24.1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.latest().unwrap().channels[0].temperature_c, 23.5);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn bad_packet_keeps_previous_values() {
        let mut session = session();
        session.transport.push_read(GOOD);
        session.transport.push_read(SHORT);
        session.transport.push_read(b"abc,50.0,1.2,0.3,24.100,48.0,1.1,0.2\r\n");
        session.tick().unwrap();

        let outcome = session.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(DecodeFailure::FieldCount { expected: 8, found: 7 }));
        let outcome = session.tick().unwrap();
        assert!(matches!(outcome, TickOutcome::Skipped(DecodeFailure::InvalidNumber { index: 0, .. })));

        assert_eq!(session.latest().unwrap().channels[0].temperature_c, 23.5);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.ticks(), 3);
        assert_eq!(session.skipped_ticks(), 2);
    }

    #[test]
    fn empty_read_is_skipped() {
        let mut session = session();
        let outcome = session.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(DecodeFailure::FieldCount { expected: 8, found: 0 }));
        assert!(session.latest().is_none());
    }

    #[test]
    fn transport_error_is_returned() {
        let mut session = session();
        session.transport.fail_next_read = Some(io::ErrorKind::BrokenPipe);
        assert!(matches!(session.tick(), Err(Error::Io(_))));
        // The next tick carries on.
        session.transport.push_read(GOOD);
        assert!(matches!(session.tick().unwrap(), TickOutcome::Updated(_)));
    }

    #[test]
    fn disconnect_closes_transport_and_returns_history() {
        let mut session = session();
        session.transport.push_read(GOOD);
        session.tick().unwrap();
        let history = session.disconnect().unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn connect_to_unreachable_port_simulates() {
        let config = Config {
            port: Some("/dev/tempctl-does-not-exist".into()),
            ..Config::default()
        };
        let mut session = Session::connect(&config).unwrap();
        assert_eq!(session.mode(), LinkMode::Simulation);
        assert_eq!(session.port_name(), "Simulation");
        assert!(session.simulation_reason().is_some());

        session.set_channel(0, ChannelSetpoint::default()).unwrap();
        assert!(matches!(session.tick().unwrap(), TickOutcome::Skipped(_)));
        session.disconnect().unwrap();
    }

    #[test]
    fn poll_timer_does_not_refire_while_in_flight() {
        let start = Instant::now();
        let interval = Duration::from_millis(500);
        let mut timer = PollTimer::new(interval, start);

        assert!(!timer.fire(start));
        assert_eq!(timer.until_due(start), interval);

        let due = start + interval;
        assert!(timer.fire(due));
        assert!(timer.in_flight());
        // A slow read: well past the next deadline, still no second cycle.
        assert!(!timer.fire(due + Duration::from_secs(5)));

        let finished = due + Duration::from_secs(5);
        timer.complete(finished);
        assert!(!timer.fire(finished));
        assert!(timer.fire(finished + interval));
    }
}
