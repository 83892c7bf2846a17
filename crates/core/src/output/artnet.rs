//! Art-Net OpDmx output.
//!
//! The lighting daemon listens for Art-Net on UDP port 6454 and forwards each
//! universe to its patched fixtures.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

use super::FrameSink;
use crate::{LightingError, Result, UNIVERSE_SIZE};

pub const ARTNET_PORT: u16 = 6454;
const HEADER: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const PROTOCOL_VERSION: u16 = 14;
const HEADER_LEN: usize = 18;

/// Builds one OpDmx packet. Art-Net wants an even data length of at least
/// two channels, so odd frames get a trailing zero.
pub fn build_packet(sequence: u8, universe: u16, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(UNIVERSE_SIZE)];
    let length = (data.len() + data.len() % 2).max(2);

    let mut packet = vec![0u8; HEADER_LEN + length];
    packet[0..8].copy_from_slice(HEADER);
    packet[8..10].copy_from_slice(&OP_DMX.to_le_bytes());
    packet[10..12].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet[12] = sequence;
    packet[13] = 0;
    packet[14..16].copy_from_slice(&universe.to_le_bytes());
    packet[16..18].copy_from_slice(&(length as u16).to_be_bytes());
    packet[HEADER_LEN..HEADER_LEN + data.len()].copy_from_slice(data);
    packet
}

fn resolve(address: &str) -> Result<SocketAddr> {
    if let Ok(target) = address.parse::<SocketAddr>() {
        return Ok(target);
    }
    let bare = address.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, ARTNET_PORT));
    }

    let with_port = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{ARTNET_PORT}")
    };
    with_port
        .to_socket_addrs()
        .map_err(|err| LightingError::Config(format!("daemon address `{address}`: {err}")))?
        .next()
        .ok_or_else(|| LightingError::Config(format!("daemon address `{address}` did not resolve")))
}

/// Sends frames to one Art-Net node over UDP.
#[derive(Debug)]
pub struct ArtNetSink {
    target: SocketAddr,
    socket: Option<UdpSocket>,
    sequence: u8,
}

impl ArtNetSink {
    /// Resolves the target address. A bare host or IP (v4 or v6) gets the
    /// Art-Net port.
    pub fn new(address: &str) -> Result<Self> {
        let target = resolve(address)?;
        Ok(Self {
            target,
            socket: None,
            sequence: 0,
        })
    }

    /// Next sequence number; zero means "unsequenced" to receivers so it is
    /// skipped.
    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        self.sequence
    }
}

impl FrameSink for ArtNetSink {
    fn connect(&mut self) -> Result<()> {
        let local = if self.target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        socket.connect(self.target)?;
        tracing::info!(daemon = %self.target, "art-net output ready");
        self.socket = Some(socket);
        Ok(())
    }

    fn send_frame(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        let sequence = self.next_sequence();
        let Some(socket) = self.socket.as_ref() else {
            return Err(LightingError::Transmit("not connected".to_string()));
        };
        let packet = build_packet(sequence, universe, data);
        if let Err(err) = socket.send(&packet) {
            self.socket = None;
            return Err(LightingError::Transmit(err.to_string()));
        }
        tracing::trace!(universe, sequence, len = data.len(), "sent art-net frame");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn describe(&self) -> String {
        format!("art-net {}", self.target)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn packet_layout() {
        let packet = build_packet(7, 1, &[10, 20, 30, 40]);
        assert_eq!(&packet[0..8], b"Art-Net\0");
        assert_eq!(&packet[8..10], &[0x00, 0x50]);
        assert_eq!(&packet[10..12], &[0, 14]);
        assert_eq!(packet[12], 7);
        assert_eq!(&packet[14..16], &[1, 0]);
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..], &[10, 20, 30, 40]);
    }

    #[test]
    fn odd_lengths_are_padded() {
        let packet = build_packet(1, 1, &[1, 2, 3]);
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..], &[1, 2, 3, 0]);

        let full = build_packet(1, 1, &[0; 600]);
        assert_eq!(full.len(), 18 + UNIVERSE_SIZE);
    }

    #[test]
    fn daemon_addresses_get_the_default_port() {
        let v6 = ArtNetSink::new("::1").unwrap().target;
        assert_eq!(v6, SocketAddr::new("::1".parse().unwrap(), ARTNET_PORT));
        assert_eq!(ArtNetSink::new("[::1]").unwrap().target, v6);
        assert_eq!(ArtNetSink::new("[::1]:7000").unwrap().target.port(), 7000);
        assert_eq!(ArtNetSink::new("10.0.0.5").unwrap().target.port(), ARTNET_PORT);
        assert_eq!(ArtNetSink::new("10.0.0.5:6455").unwrap().target.port(), 6455);
    }

    #[test]
    fn sequence_skips_zero() {
        let mut sink = ArtNetSink::new("127.0.0.1").unwrap();
        assert_eq!(sink.target.port(), ARTNET_PORT);
        sink.sequence = 254;
        assert_eq!(sink.next_sequence(), 255);
        assert_eq!(sink.next_sequence(), 1);
    }

    #[test]
    fn sends_to_a_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let mut sink = ArtNetSink::new(&address).unwrap();
        assert!(sink.send_frame(1, &[1, 2]).is_err());
        sink.connect().unwrap();
        sink.send_frame(1, &[255, 0, 128, 0]).unwrap();

        let mut buffer = [0u8; 600];
        let len = listener.recv(&mut buffer).unwrap();
        assert_eq!(len, 22);
        assert_eq!(&buffer[18..22], &[255, 0, 128, 0]);
    }
}
