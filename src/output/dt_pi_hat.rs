//! I2C-attached pixel hat (DWAB Technology Field LED Pi Hat)
//!
//! The hat listens at a fixed address on `/dev/i2c-1`. Each of its ports is
//! written with one framed command per frame: a "write channel N" command
//! byte followed by the port's RGB bytes. The hat only accepts a command that
//! arrives as a single bus transaction, so each port's buffer goes out in one
//! `write()`.

use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;

use super::{parse_settings, ChannelOutput, OutputBase};
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame};
use crate::pixel_string::{PixelString, PixelStringConfig};
use crate::transport::{I2cBus, I2cConnector, LinuxI2c};

pub const TYPE_NAME: &str = "DTFieldPiHat";

const I2C_BUS: &str = "/dev/i2c-1";
const I2C_ADDR: u16 = 0x10;
const CMD_WRITE_CH1: u8 = 0x21;
const I2C_TIMEOUT: Duration = Duration::from_millis(20);

/// 36 RGB pixels per port
pub const DT_HAT_MAX_CHANNELS: usize = 36 * 3;
pub const DT_HAT_NUM_PORTS: usize = 2;

#[derive(Debug, Deserialize)]
struct DtPiHatSettings {
    #[serde(default)]
    outputs: Vec<PixelStringConfig>,
}

pub struct DtPiHat {
    base: OutputBase,
    strings: Vec<PixelString>,
    pixels: usize,
    bus: Option<Box<dyn I2cBus>>,
    connector: I2cConnector,
    buf: Vec<u8>,
}

impl DtPiHat {
    pub fn new(start_channel: usize, channel_count: usize) -> Self {
        Self::with_connector(start_channel, channel_count, LinuxI2c::connector(I2C_TIMEOUT))
    }

    /// Use `connector` instead of the Linux i2c-dev device
    pub fn with_connector(start_channel: usize, channel_count: usize, connector: I2cConnector) -> Self {
        tracing::debug!("DTPiHat({}, {})", start_channel, channel_count);
        DtPiHat {
            base: OutputBase::new(
                start_channel,
                channel_count,
                DT_HAT_MAX_CHANNELS * DT_HAT_NUM_PORTS,
            ),
            strings: Vec::new(),
            pixels: 0,
            bus: None,
            connector,
            buf: Vec::with_capacity(DT_HAT_MAX_CHANNELS + 1),
        }
    }

    pub fn strings(&self) -> &[PixelString] {
        &self.strings
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels
    }

    /// Frame and transmit one string as a single transaction
    fn send_string(
        bus: &mut dyn I2cBus,
        buf: &mut Vec<u8>,
        string: &PixelString,
        frame: &Frame,
    ) -> Result<()> {
        buf.clear();
        buf.push(CMD_WRITE_CH1 + string.port_number());
        buf.resize(string.output_channel_count() + 1, 0);
        string.render(frame, &mut buf[1..]);

        tracing::trace!("[{}] port {}: {}", TYPE_NAME, string.port_number(), hex::encode(&buf[..]));

        match bus.write(&buf[..]) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => Err(OutputError::transport(
                I2C_BUS,
                format!("wrote {} of {} bytes to port {}", n, buf.len(), string.port_number()),
            )),
            Err(e) => Err(OutputError::transport(I2C_BUS, e)),
        }
    }
}

impl ChannelOutput for DtPiHat {
    fn name(&self) -> &str {
        TYPE_NAME
    }

    fn init(&mut self, config: &serde_json::Value) -> Result<()> {
        self.base.check_limits(TYPE_NAME)?;
        let settings: DtPiHatSettings = parse_settings(TYPE_NAME, config)?;

        let mut strings = Vec::with_capacity(settings.outputs.len());
        for string_config in &settings.outputs {
            if string_config.port_number as usize >= DT_HAT_NUM_PORTS {
                return Err(OutputError::config(format!(
                    "{TYPE_NAME}: port {} does not exist, hat has {} ports",
                    string_config.port_number, DT_HAT_NUM_PORTS
                )));
            }
            let string = PixelString::with_max_channels(string_config, DT_HAT_MAX_CHANNELS)?;
            strings.push(string);
        }

        self.pixels = strings.iter().map(PixelString::pixel_count).sum();
        self.strings = strings;
        tracing::debug!("Found {} strings of pixels", self.strings.len());

        let bus = (self.connector)(I2C_BUS, I2C_ADDR).map_err(|e| {
            tracing::error!("Failed opening I2C bus {} at 0x{:02x}: {}", I2C_BUS, I2C_ADDR, e);
            OutputError::open(format!("{I2C_BUS}@0x{I2C_ADDR:02x}"), e)
        })?;
        self.bus = Some(bus);

        tracing::info!(
            "{} ready: {} strings, {} pixels",
            TYPE_NAME,
            self.strings.len(),
            self.pixels
        );
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> usize {
        let Some(bus) = self.bus.as_deref_mut() else {
            return 0;
        };

        for string in &self.strings {
            // Ports with nothing mapped are left alone
            if string.output_channel_count() == 0 {
                continue;
            }
            if let Err(e) = Self::send_string(bus, &mut self.buf, string, frame) {
                tracing::error!("{}", e);
            }
        }

        self.base.channel_count
    }

    fn close(&mut self) {
        if self.bus.take().is_some() {
            tracing::debug!("{} closed", TYPE_NAME);
        }
    }

    fn required_channel_range(&self) -> ChannelRange {
        self.strings
            .iter()
            .fold(ChannelRange::EMPTY, |range, s| range.union(s.required_channel_range()))
    }

    fn channel_count(&self) -> usize {
        self.base.channel_count
    }

    fn dump_config(&self) -> String {
        let mut out = format!("{}: {}", TYPE_NAME, self.base.dump_config());
        for (i, string) in self.strings.iter().enumerate() {
            let _ = write!(out, "\n    string #{}: {}", i, string.dump_config());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MAX_CHANNELS;
    use crate::transport::mock;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn two_strings() -> serde_json::Value {
        json!({
            "type": "DTFieldPiHat",
            "startChannel": 0,
            "channelCount": 6,
            "outputs": [
                { "portNumber": 0, "virtualStrings": [{ "startChannel": 0, "pixelCount": 2 }] },
                { "portNumber": 1 }
            ]
        })
    }

    fn hat(writes: &mock::Log<Vec<u8>>, short: Vec<usize>) -> DtPiHat {
        DtPiHat::with_connector(0, 6, mock::i2c_connector(Arc::clone(writes), short))
    }

    #[test]
    fn test_end_to_end_one_transaction_per_active_string() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![]);
        hat.init(&two_strings()).unwrap();
        assert_eq!(hat.pixel_count(), 2);

        let frame = Frame::from(vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(hat.send_frame(&frame), 6);

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], vec![0x21, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_zero_frame_sends_table_zero() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![]);
        hat.init(&json!({
            "outputs": [
                { "portNumber": 1, "virtualStrings": [{ "startChannel": 3, "pixelCount": 1, "gamma": 2.0 }] }
            ]
        }))
        .unwrap();

        hat.send_frame(&Frame::blank(6));
        let writes = writes.lock().unwrap();
        assert_eq!(writes[0], vec![0x22, 0, 0, 0]);
    }

    #[test]
    fn test_short_write_does_not_stop_next_string() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![0]);
        hat.init(&json!({
            "outputs": [
                { "portNumber": 0, "outputMap": [0, 1, 2] },
                { "portNumber": 1, "outputMap": [3, 4, 5] }
            ]
        }))
        .unwrap();

        let frame = Frame::from(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(hat.send_frame(&frame), 6);
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], vec![0x22, 4, 5, 6]);
    }

    #[test]
    fn test_short_write_is_transport_error() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut bus = mock::MockI2c {
            writes: Arc::clone(&writes),
            short_writes: vec![0],
            failed_writes: vec![1],
            attempts: 0,
        };
        let config: PixelStringConfig =
            serde_json::from_value(json!({ "portNumber": 0, "outputMap": [0, 1, 2] })).unwrap();
        let string = PixelString::new(&config).unwrap();
        let mut buf = Vec::new();

        let err = DtPiHat::send_string(&mut bus, &mut buf, &string, &Frame::blank(3)).unwrap_err();
        assert!(matches!(err, OutputError::TransportTransaction { .. }));

        // Second transaction times out
        let err = DtPiHat::send_string(&mut bus, &mut buf, &string, &Frame::blank(3)).unwrap_err();
        assert!(matches!(err, OutputError::TransportTransaction { .. }));
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_write_error_does_not_stop_next_string() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = DtPiHat::with_connector(
            0,
            6,
            mock::flaky_i2c_connector(Arc::clone(&writes), vec![], vec![0]),
        );
        hat.init(&json!({
            "outputs": [
                { "portNumber": 0, "outputMap": [0, 1, 2] },
                { "portNumber": 1, "outputMap": [3, 4, 5] }
            ]
        }))
        .unwrap();

        let frame = Frame::from(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(hat.send_frame(&frame), 6);
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], vec![0x22, 4, 5, 6]);
    }

    #[test]
    fn test_huge_null_nodes_rejected_without_expanding() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![]);
        let err = hat
            .init(&json!({
                "outputs": [{
                    "portNumber": 0,
                    "virtualStrings": [{ "startChannel": 0, "pixelCount": 1, "nullNodes": u64::MAX / 2 }]
                }]
            }))
            .unwrap_err();
        assert!(matches!(err, OutputError::Configuration(_)));
    }

    #[test]
    fn test_open_failure() {
        let mut hat = DtPiHat::with_connector(0, 6, mock::failing_i2c_connector());
        let err = hat.init(&two_strings()).unwrap_err();
        assert!(matches!(err, OutputError::DeviceOpen { .. }));

        // Never-opened driver: sending is a no-op, close is harmless
        assert_eq!(hat.send_frame(&Frame::blank(6)), 0);
        hat.close();
        hat.close();
    }

    #[test]
    fn test_close_twice() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![]);
        hat.init(&two_strings()).unwrap();
        hat.close();
        hat.close();
        assert_eq!(hat.send_frame(&Frame::blank(6)), 0);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_port_and_oversized_string() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut bad_port = hat(&writes, vec![]);
        assert!(bad_port
            .init(&json!({ "outputs": [{ "portNumber": 5, "outputMap": [0, 1, 2] }] }))
            .is_err());

        let mut oversized = hat(&writes, vec![]);
        assert!(oversized
            .init(&json!({
                "outputs": [{ "portNumber": 0, "virtualStrings": [{ "startChannel": 0, "pixelCount": 37 }] }]
            }))
            .is_err());
    }

    #[test]
    fn test_required_channel_range() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut hat = hat(&writes, vec![]);
        hat.init(&json!({
            "outputs": [
                { "portNumber": 0, "outputMap": [40, 12, 17] },
                { "portNumber": 1, "virtualStrings": [{ "startChannel": 90, "pixelCount": 1, "nullNodes": 2 }] }
            ]
        }))
        .unwrap();
        assert_eq!(hat.required_channel_range(), ChannelRange { min: 12, max: 92 });

        let mut empty = DtPiHat::with_connector(0, 0, mock::i2c_connector(writes, vec![]));
        empty.init(&json!({ "outputs": [] })).unwrap();
        assert_eq!(
            empty.required_channel_range(),
            ChannelRange { min: MAX_CHANNELS, max: 0 }
        );
    }
}
