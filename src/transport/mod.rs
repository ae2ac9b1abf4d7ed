use std::io;
use std::net::UdpSocket;

use anyhow::Error;
use log::{debug, warn};
use thiserror::Error as ErrorDerive;

use crate::dmx::UNIVERSE_CHANNELS;

pub const ARTNET_PORT: u16 = 6454;

const ARTNET_HEADER: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const PAYLOAD_OFFSET: usize = 18;
const MAX_PACKET: usize = PAYLOAD_OFFSET + UNIVERSE_CHANNELS;

/// Whatever delivers raw channel buffers to the control loop. `poll`
/// must return immediately; the loop calls it once per iteration and
/// never blocks on it.
pub trait FrameSource {
    fn poll(&mut self) -> Option<Vec<u8>>;
}

#[derive(Debug, ErrorDerive, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short ({0} bytes)")]
    Truncated(usize),
    #[error("missing Art-Net header")]
    BadHeader,
    #[error("unsupported opcode {0:#06x}")]
    UnsupportedOpcode(u16),
    #[error("universe {got}, listening on {want}")]
    WrongUniverse { got: u16, want: u16 },
    #[error("declared length {declared} exceeds the {available} bytes received")]
    BadLength { declared: usize, available: usize },
}

/// Parses an ArtDmx packet and returns its channel payload. Opcode and
/// universe are little-endian, the payload length big-endian, per the
/// Art-Net 4 framing.
pub fn parse_art_dmx(packet: &[u8], universe: u16) -> Result<&[u8], PacketError> {
    if packet.len() < PAYLOAD_OFFSET {
        return Err(PacketError::Truncated(packet.len()));
    }
    if &packet[0..8] != ARTNET_HEADER {
        return Err(PacketError::BadHeader);
    }

    let opcode = u16::from_le_bytes([packet[8], packet[9]]);
    if opcode != OP_DMX {
        return Err(PacketError::UnsupportedOpcode(opcode));
    }

    let got = u16::from_le_bytes([packet[14], packet[15]]);
    if got != universe {
        return Err(PacketError::WrongUniverse {
            got,
            want: universe,
        });
    }

    let declared = u16::from_be_bytes([packet[16], packet[17]]) as usize;
    let available = packet.len() - PAYLOAD_OFFSET;
    if declared > available {
        return Err(PacketError::BadLength {
            declared,
            available,
        });
    }

    Ok(&packet[PAYLOAD_OFFSET..PAYLOAD_OFFSET + declared])
}

/// Art-Net listener on a non-blocking UDP socket. One `poll` drains
/// datagrams until it finds a frame for the configured universe or the
/// socket runs dry.
pub struct ArtnetSource {
    socket: UdpSocket,
    universe: u16,
    buf: [u8; MAX_PACKET],
}

impl ArtnetSource {
    pub fn bind(addr: &str, universe: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        Ok(ArtnetSource {
            socket,
            universe,
            buf: [0; MAX_PACKET],
        })
    }
}

impl FrameSource for ArtnetSource {
    fn poll(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, peer)) => match parse_art_dmx(&self.buf[..len], self.universe) {
                    Ok(payload) => {
                        debug!("frame from {}: {} channels", peer, payload.len());
                        return Some(payload.to_vec());
                    }
                    // Other universes on the wire are normal traffic.
                    Err(PacketError::WrongUniverse { .. }) => continue,
                    Err(e) => {
                        warn!("dropping packet from {}: {}", peer, e);
                        continue;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!("art-net receive failed: {}", e);
                    return None;
                }
            }
        }
    }
}
