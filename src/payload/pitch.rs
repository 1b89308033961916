//! `vpch` vocal pitch stream
//!
//! A uniform stream of f32 pitch samples in MIDI cents, little-endian on the
//! wire, sampled at 25 Hz. The stream origin is wire time (the first decoded
//! sample); queries in logical time go through the encoder delay.

use crate::error::{Error, Result};
use crate::timing::EncoderDelay;
use byteorder::{ByteOrder, LittleEndian};

/// Sample rate this crate writes pitch streams at
pub const PITCH_SAMPLE_RATE_HZ: u16 = 25;

/// Vocal pitch curve in MIDI cents
#[derive(Debug, Clone, PartialEq)]
pub struct PitchCurve {
    pub sample_rate_hz: u16,
    pub values: Vec<f32>,
}

impl PitchCurve {
    /// Create a curve at the standard 25 Hz rate
    pub fn new(values: Vec<f32>) -> Self {
        PitchCurve {
            sample_rate_hz: PITCH_SAMPLE_RATE_HZ,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stream duration in seconds
    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            0.0
        } else {
            self.values.len() as f64 / self.sample_rate_hz as f64
        }
    }

    /// Encode as a little-endian f32 array
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.values.len() * 4];
        LittleEndian::write_f32_into(&self.values, &mut out);
        out
    }

    /// Decode from a little-endian f32 array
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::payload(format!(
                "vpch payload length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let mut values = vec![0f32; bytes.len() / 4];
        LittleEndian::read_f32_into(bytes, &mut values);
        Ok(PitchCurve::new(values))
    }

    /// Sample at a wire timestamp, `None` outside the stream
    pub fn value_at_wire(&self, wire_sec: f64) -> Option<f32> {
        if wire_sec < 0.0 || self.sample_rate_hz == 0 {
            return None;
        }
        let index = (wire_sec * self.sample_rate_hz as f64) as usize;
        self.values.get(index).copied()
    }

    /// Sample at a logical timestamp, converting through the encoder delay
    pub fn value_at(&self, logical_sec: f64, delay: &EncoderDelay) -> Option<f32> {
        self.value_at_wire(delay.to_wire(logical_sec))
    }
}
