//! WS2801 pixel strings on a Raspberry Pi SPI bus
//!
//! The string consumes a dense run of channels straight off the frame. The
//! Hanson Electronics Pi36 board needs a reorder: its two onboard WS2803
//! chips read from the tail of the stream while chained WS2801 pixels read
//! from the head.

use std::fmt::Write as _;

use super::{ChannelOutput, OutputBase};
use crate::config::OutputHeader;
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame};
use crate::transport::{LinuxSpi, SpiBus, SpiConnector};

pub const TYPE_NAME: &str = "SPI-WS2801";

pub const SPIWS2801_MAX_CHANNELS: usize = 1530;
const SPI_SPEED_HZ: u32 = 1_000_000;

/// Channels driven by the two onboard WS2803 chips
const PI36_ONBOARD_CHANNELS: usize = 36;
const PI36_GROUP_CHANNELS: usize = 18;

/// Copy the Pi36 layout of the channels starting at `start` into `out`.
///
/// `out` is `max(channel_count, 36)` bytes. Frame channels 0-17 land in the
/// last 18 bytes, 18-35 in the 18 before them, the rest at the head.
pub fn pi36_reorder(frame: &Frame, start: usize, out: &mut [u8]) {
    let downstream = out.len() - PI36_ONBOARD_CHANNELS;

    for i in 0..PI36_GROUP_CHANNELS {
        out[downstream + PI36_GROUP_CHANNELS + i] = frame.channel(start + i);
        out[downstream + i] = frame.channel(start + PI36_GROUP_CHANNELS + i);
    }
    for (i, byte) in out[..downstream].iter_mut().enumerate() {
        *byte = frame.channel(start + PI36_ONBOARD_CHANNELS + i);
    }
}

/// Render a JSON config object as `key=value;` pairs, header keys excluded
pub fn config_string(config: &serde_json::Value) -> String {
    let mut out = String::new();
    let Some(object) = config.as_object() else {
        return out;
    };

    for (key, value) in object {
        if OutputHeader::KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => continue,
        };
        let _ = write!(out, "{key}={value};");
    }
    out
}

pub struct SpiWs2801Output {
    base: OutputBase,
    port: Option<u8>,
    pi36: bool,
    pi36_data: Vec<u8>,
    /// Zero-padded copy used when the frame is shorter than the string
    padded: Vec<u8>,
    spi: Option<Box<dyn SpiBus>>,
    connector: SpiConnector,
}

impl SpiWs2801Output {
    pub fn new(start_channel: usize, channel_count: usize) -> Self {
        Self::with_connector(start_channel, channel_count, LinuxSpi::connector())
    }

    pub fn with_connector(start_channel: usize, channel_count: usize, connector: SpiConnector) -> Self {
        tracing::debug!("SPIws2801Output({}, {})", start_channel, channel_count);
        SpiWs2801Output {
            base: OutputBase::new(start_channel, channel_count, SPIWS2801_MAX_CHANNELS),
            port: None,
            pi36: false,
            pi36_data: Vec::new(),
            padded: Vec::new(),
            spi: None,
            connector,
        }
    }

    /// Configure from `key=value` pairs separated by `;`
    pub fn init_str(&mut self, config: &str) -> Result<()> {
        tracing::debug!("{}::init('{}')", TYPE_NAME, config);

        for elem in config.split(';') {
            let Some((key, value)) = elem.split_once('=') else {
                continue;
            };
            match (key.trim(), value.trim()) {
                ("device", device) => {
                    tracing::debug!("Using {} for SPI output", device);
                    match device {
                        "spidev0.0" => self.port = Some(0),
                        "spidev0.1" => self.port = Some(1),
                        other => tracing::warn!("Unknown SPI device '{}'", other),
                    }
                }
                ("pi36", "1") => self.pi36 = true,
                _ => {}
            }
        }

        let Some(port) = self.port else {
            tracing::error!("Invalid config string: {}", config);
            return Err(OutputError::config(format!(
                "{TYPE_NAME}: no valid SPI device in '{config}'"
            )));
        };
        self.base.check_limits(TYPE_NAME)?;

        if self.pi36 {
            self.pi36_data = vec![0u8; self.base.channel_count.max(PI36_ONBOARD_CHANNELS)];
        }

        match (self.connector)(port, SPI_SPEED_HZ) {
            Ok(spi) => self.spi = Some(spi),
            Err(e) => {
                tracing::error!("Unable to open SPI device spidev0.{}: {}", port, e);
                self.pi36_data = Vec::new();
                return Err(OutputError::open(format!("spidev0.{port}"), e));
            }
        }

        tracing::info!(
            "{} ready on spidev0.{} ({} channels{})",
            TYPE_NAME,
            port,
            self.base.channel_count,
            if self.pi36 { ", pi36" } else { "" }
        );
        Ok(())
    }

    pub fn is_pi36(&self) -> bool {
        self.pi36
    }
}

impl ChannelOutput for SpiWs2801Output {
    fn name(&self) -> &str {
        TYPE_NAME
    }

    fn init(&mut self, config: &serde_json::Value) -> Result<()> {
        self.init_str(&config_string(config))
    }

    fn send_frame(&mut self, frame: &Frame) -> usize {
        let Some(spi) = self.spi.as_deref_mut() else {
            return 0;
        };

        let start = self.base.start_channel;
        let count = self.base.channel_count;

        let data: &[u8] = if self.pi36 {
            pi36_reorder(frame, start, &mut self.pi36_data);
            &self.pi36_data
        } else if let Some(slice) = frame.get(start..start + count) {
            slice
        } else {
            self.padded.clear();
            self.padded.extend((start..start + count).map(|ch| frame.channel(ch)));
            &self.padded
        };

        tracing::trace!("[{}] {}", TYPE_NAME, hex::encode(data));

        if let Err(e) = spi.transfer(data) {
            tracing::error!("{}", OutputError::transport(TYPE_NAME, e));
        }

        count
    }

    fn close(&mut self) {
        if self.spi.take().is_some() {
            tracing::debug!("{} closed", TYPE_NAME);
        }
        self.pi36_data = Vec::new();
        self.padded = Vec::new();
    }

    fn required_channel_range(&self) -> ChannelRange {
        ChannelRange::span(self.base.start_channel, self.base.channel_count)
    }

    fn channel_count(&self) -> usize {
        self.base.channel_count
    }

    fn dump_config(&self) -> String {
        let port = self.port.map_or_else(|| "none".to_string(), |p| p.to_string());
        format!(
            "{}: {}\n    port: {}\n    pi36: {}",
            TYPE_NAME,
            self.base.dump_config(),
            port,
            self.pi36
        )
    }
}
