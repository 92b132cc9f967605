//! Wire format spoken by the controller firmware.
//!
//! Host → device: one line of comma-separated fixed-point integers carrying
//! setpoint, proportional band, integral time and ramp rate for both
//! channels. Device → host: CRLF-terminated ASCII floats, eight per packet
//! (or nine when the instrument has a sample thermometer).

use serde::{Deserialize, Serialize};

use crate::error::{DecodeFailure, Error, Result};

/// Number of regulated channels on the controller.
pub const CHANNEL_COUNT: usize = 2;

/// Fields per channel in both directions.
pub const FIELDS_PER_CHANNEL: usize = 4;

/// Separator between fields on the wire.
pub const FIELD_DELIMITER: &str = ",";

/// Separator between telemetry records.
pub const LINE_DELIMITER: &str = "\r\n";

/// Character that starts the control loop on firmware that waits for it.
pub const START_TRIGGER: &str = "a";

// Fixed-point scale factors baked into the firmware.
const SETPOINT_SCALE: f64 = 4.0;
const BAND_SCALE: f64 = 4.0;
const INTEGRAL_MS_PER_S: f64 = 1000.0;
const INTEGRAL_SCALE: f64 = 4.0;
const RATE_SCALE: f64 = 100.0;

/// Which flavour of the controller firmware is on the other end.
///
/// The two instruments share one protocol and differ only in whether the
/// telemetry packet carries a trailing sample temperature and whether the
/// command needs a trigger character to start the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolVariant {
    /// Telemetry ends with a ninth field, the sample-channel temperature.
    pub sample_channel: bool,
    /// Commands end with `,a`.
    pub start_trigger: bool,
}

impl ProtocolVariant {
    /// Plain two-channel controller: 8 telemetry fields, no trigger.
    pub const TWO_CHANNEL: Self = Self {
        sample_channel: false,
        start_trigger: false,
    };

    /// Two channels plus a sample thermometer: 9 telemetry fields.
    pub const WITH_SAMPLE: Self = Self {
        sample_channel: true,
        start_trigger: false,
    };

    /// Returns this variant with the start trigger switched on or off.
    pub const fn with_trigger(mut self, start_trigger: bool) -> Self {
        self.start_trigger = start_trigger;
        self
    }

    /// Number of fields in one telemetry packet.
    pub const fn field_count(&self) -> usize {
        CHANNEL_COUNT * FIELDS_PER_CHANNEL + if self.sample_channel { 1 } else { 0 }
    }
}

/// Regulation parameters for one channel, in engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSetpoint {
    pub setpoint_c: f64,
    pub band_c: f64,
    pub integral_time_s: f64,
    pub rate_per_s: f64,
}

impl Default for ChannelSetpoint {
    /// Front-panel defaults of the instrument.
    fn default() -> Self {
        Self {
            setpoint_c: 25.4,
            band_c: 5.0,
            integral_time_s: 30.0,
            rate_per_s: 0.1,
        }
    }
}

impl ChannelSetpoint {
    /// Converts to the integers the firmware expects.
    ///
    /// The setpoint is truncated toward zero while the other three fields are
    /// rounded half-to-even; existing firmware was commissioned against
    /// exactly this behaviour.
    pub fn scaled(&self, channel: usize) -> Result<ScaledParameters> {
        let check = |field: &'static str, value: f64| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(Error::InvalidInput { channel, field, value })
            }
        };

        let setpoint = check("setpoint", self.setpoint_c)?;
        let band = check("band", self.band_c)?;
        let integral = check("integral time", self.integral_time_s)?;
        let rate = check("rate", self.rate_per_s)?;

        Ok(ScaledParameters {
            setpoint: (setpoint * SETPOINT_SCALE).trunc() as i64,
            band: (band * BAND_SCALE).round_ties_even() as i64,
            integral: (integral * INTEGRAL_MS_PER_S * INTEGRAL_SCALE).round_ties_even() as i64,
            rate: (rate * RATE_SCALE).round_ties_even() as i64,
        })
    }
}

/// One channel's parameters as fixed-point integers on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScaledParameters {
    pub setpoint: i64,
    pub band: i64,
    pub integral: i64,
    pub rate: i64,
}

impl ScaledParameters {
    /// Back to engineering units, as the firmware interprets the integers.
    pub fn to_setpoint(&self) -> ChannelSetpoint {
        ChannelSetpoint {
            setpoint_c: self.setpoint as f64 / SETPOINT_SCALE,
            band_c: self.band as f64 / BAND_SCALE,
            integral_time_s: self.integral as f64 / (INTEGRAL_MS_PER_S * INTEGRAL_SCALE),
            rate_per_s: self.rate as f64 / RATE_SCALE,
        }
    }

    fn fields(&self) -> [i64; FIELDS_PER_CHANNEL] {
        [self.setpoint, self.band, self.integral, self.rate]
    }
}

/// Live values reported for one channel.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub temperature_c: f64,
    pub output_pct: f64,
    pub proportional_term: f64,
    pub integral_term: f64,
}

impl ChannelReading {
    fn from_fields(fields: &[f64]) -> Self {
        Self {
            temperature_c: fields[0],
            output_pct: fields[1],
            proportional_term: fields[2],
            integral_term: fields[3],
        }
    }
}

/// A fully decoded telemetry packet.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub channels: [ChannelReading; CHANNEL_COUNT],
    /// Present only for [`ProtocolVariant::WITH_SAMPLE`].
    pub sample_temperature_c: Option<f64>,
}

/// Builds the command string for both channels.
///
/// Layout: `sp0,band0,int0,rate0,sp1,band1,int1,rate1`, followed by `,a`
/// when the variant needs a start trigger.
pub fn encode_command(channels: &[ChannelSetpoint; CHANNEL_COUNT], variant: ProtocolVariant) -> Result<String> {
    let mut fields = Vec::with_capacity(CHANNEL_COUNT * FIELDS_PER_CHANNEL + 1);
    for (channel, setpoint) in channels.iter().enumerate() {
        let scaled = setpoint.scaled(channel)?;
        fields.extend(scaled.fields().iter().map(i64::to_string));
    }
    if variant.start_trigger {
        fields.push(START_TRIGGER.to_string());
    }
    Ok(fields.join(FIELD_DELIMITER))
}

/// Decodes one poll's worth of bytes into a [`TelemetryFrame`].
///
/// The buffer is split on CRLF and the last element dropped: it is either
/// the empty tail after the final delimiter or a line still being written.
/// All remaining fields are taken in order, so firmware printing one value
/// per line and firmware printing one comma-separated line both decode.
/// Anything other than exactly [`ProtocolVariant::field_count`] finite
/// numbers rejects the whole packet.
pub fn decode_telemetry(buffer: &[u8], variant: ProtocolVariant) -> Result<TelemetryFrame> {
    let text = std::str::from_utf8(buffer).map_err(|_| DecodeFailure::NotText)?;

    let mut records: Vec<&str> = text.split(LINE_DELIMITER).collect();
    records.pop();

    let fields: Vec<&str> = records
        .iter()
        .flat_map(|record| record.split(FIELD_DELIMITER))
        .map(str::trim)
        .collect();

    let expected = variant.field_count();
    if fields.len() != expected {
        return Err(DecodeFailure::FieldCount {
            expected,
            found: fields.len(),
        }
        .into());
    }

    let mut values = Vec::with_capacity(expected);
    for (index, field) in fields.iter().enumerate() {
        match field.parse::<f64>() {
            Ok(value) if value.is_finite() => values.push(value),
            _ => {
                return Err(DecodeFailure::InvalidNumber {
                    index,
                    text: field.to_string(),
                }
                .into())
            }
        }
    }

    let channel_1 = FIELDS_PER_CHANNEL;
    let sample = CHANNEL_COUNT * FIELDS_PER_CHANNEL;
    Ok(TelemetryFrame {
        channels: [
            ChannelReading::from_fields(&values[..channel_1]),
            ChannelReading::from_fields(&values[channel_1..sample]),
        ],
        sample_temperature_c: variant.sample_channel.then(|| values[sample]),
    })
}

/// Parses a command string back into the integers the firmware would read.
///
/// A single trailing empty field (older hosts terminated every field with a
/// comma) is tolerated.
pub fn parse_command(command: &str, variant: ProtocolVariant) -> Result<[ScaledParameters; CHANNEL_COUNT]> {
    let mut fields: Vec<&str> = command.trim_end().split(FIELD_DELIMITER).map(str::trim).collect();

    let has_trigger = fields.last() == Some(&START_TRIGGER);
    if has_trigger != variant.start_trigger {
        return Err(DecodeFailure::Trigger.into());
    }
    if has_trigger {
        fields.pop();
    }
    if fields.last() == Some(&"") {
        fields.pop();
    }

    let expected = CHANNEL_COUNT * FIELDS_PER_CHANNEL;
    if fields.len() != expected {
        return Err(DecodeFailure::FieldCount {
            expected,
            found: fields.len(),
        }
        .into());
    }

    let mut values = [0i64; CHANNEL_COUNT * FIELDS_PER_CHANNEL];
    for (index, field) in fields.iter().enumerate() {
        values[index] = field.parse().map_err(|_| DecodeFailure::InvalidNumber {
            index,
            text: field.to_string(),
        })?;
    }

    let channel = |base: usize| ScaledParameters {
        setpoint: values[base],
        band: values[base + 1],
        integral: values[base + 2],
        rate: values[base + 3],
    };
    Ok([channel(0), channel(FIELDS_PER_CHANNEL)])
}
