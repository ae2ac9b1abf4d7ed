use anyhow::Error;
use log::debug;

use crate::dmx::Rgb;

#[cfg(feature = "pi")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// The physical strip as the control loop sees it: a full frame of
/// colors plus a global brightness, rendered in one bounded call.
pub trait LedOutput {
    fn render(&mut self, pixels: &[Rgb], brightness: u8) -> Result<(), Error>;
}

/// Video-style brightness scaling: 255 passes values through
/// unchanged, 0 blanks the strip.
pub fn scale(value: u8, brightness: u8) -> u8 {
    ((value as u16 * (brightness as u16 + 1)) >> 8) as u8
}

/// Strip byte order is GRB, the WS2812 wire order.
#[allow(dead_code)]
fn scaled_grb(pixels: &[Rgb], brightness: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(pixels.len() * 3);
    for px in pixels {
        bytes.push(scale(px.g, brightness));
        bytes.push(scale(px.r, brightness));
        bytes.push(scale(px.b, brightness));
    }
    bytes
}

/// Expands one strip byte into the SPI bit pattern that WS2812 timing
/// expects at 2.4 MHz: three SPI bits per data bit, 110 for one and
/// 100 for zero.
#[allow(dead_code)]
fn expand_byte(byte: u8) -> [u8; 3] {
    let mut bits: u32 = 0;
    for i in (0..8).rev() {
        bits <<= 3;
        bits |= if byte & (1 << i) != 0 { 0b110 } else { 0b100 };
    }
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

/// Log-only sink for hosts without strip hardware attached.
#[derive(Default)]
pub struct LogOutput {
    frames: u64,
}

impl LogOutput {
    pub fn new() -> Self {
        LogOutput::default()
    }
}

impl LedOutput for LogOutput {
    fn render(&mut self, pixels: &[Rgb], brightness: u8) -> Result<(), Error> {
        self.frames += 1;
        debug!(
            "frame {}: {} LEDs at brightness {} (first {:?})",
            self.frames,
            pixels.len(),
            brightness,
            pixels.first()
        );
        Ok(())
    }
}

/// WS2812 strip behind the Pi's SPI0 bus.
#[cfg(feature = "pi")]
pub struct SpiOutput {
    spi: Spi,
    frame: Vec<u8>,
}

#[cfg(feature = "pi")]
impl SpiOutput {
    pub fn init() -> Result<Self, Error> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 2_400_000, Mode::Mode0)?;

        Ok(SpiOutput {
            spi,
            frame: Vec::new(),
        })
    }
}

#[cfg(feature = "pi")]
impl LedOutput for SpiOutput {
    fn render(&mut self, pixels: &[Rgb], brightness: u8) -> Result<(), Error> {
        self.frame.clear();
        for byte in scaled_grb(pixels, brightness) {
            self.frame.extend_from_slice(&expand_byte(byte));
        }
        // Idle-low tail long enough for the strip to latch.
        self.frame.extend_from_slice(&[0u8; 20]);

        self.spi.write(&self.frame)?;
        Ok(())
    }
}
