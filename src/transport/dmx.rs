use serde::Deserialize;
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

pub const DMX_UNIVERSE_SIZE: usize = 512;

const ARTNET_HEADER_LEN: usize = 18;
const ARTNET_OP_DMX: u16 = 0x5000;
const ARTNET_PROTOCOL_VERSION: u16 = 14;

const ENTTEC_START: u8 = 0x7E;
const ENTTEC_END: u8 = 0xE7;
const ENTTEC_LABEL_SEND_DMX: u8 = 6;
const ENTTEC_BAUD_RATE: u32 = 57_600;

/// Streaming connection that carries whole DMX universes
pub trait DmxClient: Send {
    fn send_dmx(&mut self, universe: u16, data: &[u8; DMX_UNIVERSE_SIZE]) -> io::Result<()>;

    /// Re-establish the connection after a failed send
    fn reconnect(&mut self) -> io::Result<()>;

    /// Short human-readable description
    fn describe(&self) -> String;

    /// Highest number of universes the client can carry
    fn max_universes(&self) -> usize {
        usize::MAX
    }
}

fn default_artnet_target() -> String {
    "255.255.255.255:6454".to_string()
}

/// Client selection in a DMX output config
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DmxClientConfig {
    Artnet {
        #[serde(default = "default_artnet_target")]
        target: String,
    },
    Enttec {
        port: String,
    },
}

impl DmxClientConfig {
    pub fn connect(&self) -> io::Result<Box<dyn DmxClient>> {
        match self {
            DmxClientConfig::Artnet { target } => Ok(Box::new(ArtNetClient::new(target)?)),
            DmxClientConfig::Enttec { port } => Ok(Box::new(EnttecProClient::open(port)?)),
        }
    }
}

/// Build an ArtDmx packet carrying a full universe
pub fn build_artdmx_packet(universe: u16, sequence: u8, data: &[u8; DMX_UNIVERSE_SIZE]) -> Vec<u8> {
    let mut packet = vec![0u8; ARTNET_HEADER_LEN + DMX_UNIVERSE_SIZE];

    packet[0..8].copy_from_slice(b"Art-Net\0");
    packet[8..10].copy_from_slice(&ARTNET_OP_DMX.to_le_bytes());
    packet[10..12].copy_from_slice(&ARTNET_PROTOCOL_VERSION.to_be_bytes());
    packet[12] = sequence;
    packet[13] = 0; // physical port
    // 15-bit Port-Address: SubUni low byte, Net high byte
    packet[14..16].copy_from_slice(&(universe & 0x7FFF).to_le_bytes());
    packet[16..18].copy_from_slice(&(DMX_UNIVERSE_SIZE as u16).to_be_bytes());
    packet[ARTNET_HEADER_LEN..].copy_from_slice(data);

    packet
}

/// Art-Net sender over UDP
pub struct ArtNetClient {
    socket: UdpSocket,
    target: SocketAddr,
    sequences: HashMap<u16, u8>,
}

impl ArtNetClient {
    pub fn new(target: &str) -> io::Result<Self> {
        let target: SocketAddr = target.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid Art-Net target {target}: {e}"),
            )
        })?;
        let socket = Self::bind()?;

        tracing::info!("Art-Net client sending to {}", target);

        Ok(Self {
            socket,
            target,
            sequences: HashMap::new(),
        })
    }

    fn bind() -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;
        socket.set_write_timeout(Some(Duration::from_millis(100)))?;
        Ok(socket)
    }

    /// Next sequence number for `universe`; Art-Net reserves 0 for "disabled"
    fn next_sequence(&mut self, universe: u16) -> u8 {
        let seq = self.sequences.entry(universe).or_insert(0);
        *seq = if *seq == 255 { 1 } else { *seq + 1 };
        *seq
    }
}

impl DmxClient for ArtNetClient {
    fn send_dmx(&mut self, universe: u16, data: &[u8; DMX_UNIVERSE_SIZE]) -> io::Result<()> {
        let sequence = self.next_sequence(universe);
        let packet = build_artdmx_packet(universe, sequence, data);
        let sent = self.socket.send_to(&packet, self.target)?;
        if sent != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short Art-Net send: {} of {} bytes", sent, packet.len()),
            ));
        }
        Ok(())
    }

    fn reconnect(&mut self) -> io::Result<()> {
        self.socket = Self::bind()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Art-Net -> {}", self.target)
    }
}

/// Build an ENTTEC DMX USB Pro "Output Only Send DMX" message
pub fn build_enttec_frame(data: &[u8; DMX_UNIVERSE_SIZE]) -> Vec<u8> {
    // Payload is the DMX start code followed by the slots
    let payload_len = (DMX_UNIVERSE_SIZE + 1) as u16;
    let mut frame = Vec::with_capacity(DMX_UNIVERSE_SIZE + 6);

    frame.push(ENTTEC_START);
    frame.push(ENTTEC_LABEL_SEND_DMX);
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.push(0x00);
    frame.extend_from_slice(data);
    frame.push(ENTTEC_END);

    frame
}

/// ENTTEC DMX USB Pro widget on a serial port. Carries one universe.
pub struct EnttecProClient {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl EnttecProClient {
    pub fn open(port_name: &str) -> io::Result<Self> {
        let port = Self::open_port(port_name)?;
        tracing::info!("ENTTEC DMX USB Pro opened on {}", port_name);
        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }

    fn open_port(port_name: &str) -> io::Result<Box<dyn SerialPort>> {
        let port = serialport::new(port_name, ENTTEC_BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::Two)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;
        Ok(port)
    }
}

impl DmxClient for EnttecProClient {
    fn send_dmx(&mut self, _universe: u16, data: &[u8; DMX_UNIVERSE_SIZE]) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))?;

        let frame = build_enttec_frame(data);
        let result = port.write_all(&frame).and_then(|_| port.flush());
        if result.is_err() {
            self.port = None;
        }
        result
    }

    fn reconnect(&mut self) -> io::Result<()> {
        self.port = None;
        self.port = Some(Self::open_port(&self.port_name)?);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ENTTEC DMX USB Pro on {}", self.port_name)
    }

    fn max_universes(&self) -> usize {
        1
    }
}
