//! In-memory telemetry log with CSV export.

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::protocol::{TelemetryFrame, CHANNEL_COUNT};

/// A decoded frame and when it arrived, relative to connect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_s: f64,
    pub frame: TelemetryFrame,
}

/// Bounded log of accepted frames. The oldest sample is dropped when full.
#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, elapsed_s: f64, frame: TelemetryFrame) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { elapsed_s, frame });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Temperatures of one channel, oldest first.
    pub fn temperatures(&self, channel: usize) -> Vec<f64> {
        if channel >= CHANNEL_COUNT {
            return Vec::new();
        }
        self.samples
            .iter()
            .map(|s| s.frame.channels[channel].temperature_c)
            .collect()
    }

    /// Writes every sample as CSV, one row per frame.
    ///
    /// The sample-temperature column appears only if any frame carried one.
    pub fn write_csv<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let with_sample = self.samples.iter().any(|s| s.frame.sample_temperature_c.is_some());

        write!(out, "Time (s)")?;
        for channel in 0..CHANNEL_COUNT {
            write!(
                out,
                ",T{0} (C),Output{0} (%),P{0},I{0}",
                channel
            )?;
        }
        if with_sample {
            write!(out, ",Tsample (C)")?;
        }
        writeln!(out)?;

        for sample in &self.samples {
            write!(out, "{:.3}", sample.elapsed_s)?;
            for reading in &sample.frame.channels {
                write!(
                    out,
                    ",{},{},{},{}",
                    reading.temperature_c, reading.output_pct, reading.proportional_term, reading.integral_term
                )?;
            }
            if with_sample {
                match sample.frame.sample_temperature_c {
                    Some(t) => write!(out, ",{}", t)?,
                    None => write!(out, ",")?,
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
