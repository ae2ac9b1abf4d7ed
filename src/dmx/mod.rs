use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::ChannelMap;

/// Channels carried per Art-Net DMX frame. Sources are free to send
/// fewer; the decoder only checks the offsets the topology actually
/// references.
pub const UNIVERSE_CHANNELS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// Unpacks a 24-bit 0xRRGGBB value, the form colors take in the
    /// settings store.
    pub fn from_packed(packed: u32) -> Self {
        Rgb {
            r: (packed >> 16) as u8,
            g: (packed >> 8) as u8,
            b: packed as u8,
        }
    }

    pub fn to_packed(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("channel {channel} out of range for a {buffer_len} byte frame")]
    ChannelOutOfRange { channel: usize, buffer_len: usize },
}

/// Decodes one channel buffer through a resolved channel map into a
/// complete strip-ordered color sequence.
///
/// Pure: re-running on the same buffer yields the same output. Any
/// out-of-range offset fails the whole frame before anything reaches
/// the strip, so a bad frame never leaves a half-drawn state.
pub fn decode(buffer: &[u8], map: &ChannelMap) -> Result<Vec<Rgb>, DecodeError> {
    let mut pixels = Vec::with_capacity(map.len());

    for &channel in map.offsets() {
        if channel + 3 > buffer.len() {
            return Err(DecodeError::ChannelOutOfRange {
                channel,
                buffer_len: buffer.len(),
            });
        }
        pixels.push(Rgb::new(
            buffer[channel],
            buffer[channel + 1],
            buffer[channel + 2],
        ));
    }

    Ok(pixels)
}
