//! `kons` onset stream
//!
//! Note onset timestamps as a little-endian f64 array. On the wire the
//! values are in wire time; the codec converts to and from logical seconds
//! through the encoder delay so callers only ever see logical time.

use crate::error::{Error, Result};
use crate::timing::EncoderDelay;
use byteorder::{ByteOrder, LittleEndian};

/// Encode logical onset timestamps as wire-time f64 LE bytes
pub fn encode(onsets_logical: &[f64], delay: &EncoderDelay) -> Vec<u8> {
    let wire: Vec<f64> = onsets_logical.iter().map(|&t| delay.to_wire(t)).collect();
    let mut out = vec![0u8; wire.len() * 8];
    LittleEndian::write_f64_into(&wire, &mut out);
    out
}

/// Decode wire-time f64 LE bytes into logical onset timestamps
pub fn decode(bytes: &[u8], delay: &EncoderDelay) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(Error::payload(format!(
            "kons payload length {} is not a multiple of 8",
            bytes.len()
        )));
    }
    let mut wire = vec![0f64; bytes.len() / 8];
    LittleEndian::read_f64_into(bytes, &mut wire);
    Ok(wire.iter().map(|&t| delay.to_logical(t)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_with_delay() {
        let delay = EncoderDelay::new(1105, 44_100);
        let onsets = vec![0.5, 1.25, 60.0, 61.75];
        let decoded = decode(&encode(&onsets, &delay), &delay).unwrap();
        assert_eq!(decoded.len(), onsets.len());
        for (a, b) in onsets.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_wire_values_carry_the_delay() {
        let delay = EncoderDelay::new(4410, 44_100); // 100 ms
        let bytes = encode(&[1.0], &delay);
        let wire = f64::from_le_bytes(bytes[..8].try_into().unwrap());
        assert!((wire - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_ragged_length() {
        assert!(decode(&[0u8; 12], &EncoderDelay::none()).is_err());
    }

    #[test]
    fn test_empty_stream() {
        let delay = EncoderDelay::aac_default();
        assert!(encode(&[], &delay).is_empty());
        assert!(decode(&[], &delay).unwrap().is_empty());
    }
}
