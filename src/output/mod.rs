//! Channel output drivers
//!
//! Every transport implements [`ChannelOutput`]. The dispatcher only ever
//! sees `Box<dyn ChannelOutput>`; which variant sits behind it is decided by
//! the `type` field of the output's configuration.

use serde::Deserialize;

use crate::config::OutputHeader;
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame, MAX_CHANNELS};

pub mod dmx;
pub mod dt_pi_hat;
pub mod spi_ws2801;
pub mod threaded;

pub use dmx::DmxOutput;
pub use dt_pi_hat::DtPiHat;
pub use spi_ws2801::SpiWs2801Output;
pub use threaded::ThreadedOutput;

/// Capabilities shared by every channel output driver
pub trait ChannelOutput: Send {
    /// Driver type name used in logs
    fn name(&self) -> &str;

    /// Validate driver settings and open the transport
    fn init(&mut self, config: &serde_json::Value) -> Result<()>;

    /// Transform and transmit one frame, returning the channels handled.
    /// Transport failures are logged, never returned.
    fn send_frame(&mut self, frame: &Frame) -> usize;

    /// Release the transport. Safe to call repeatedly or after a failed `init`.
    fn close(&mut self);

    /// Channels this output reads from the frame
    fn required_channel_range(&self) -> ChannelRange;

    fn channel_count(&self) -> usize;

    /// Diagnostic description of the configuration
    fn dump_config(&self) -> String;
}

/// Configured range and hardware ceiling common to all drivers
#[derive(Debug, Clone, Copy)]
pub struct OutputBase {
    pub start_channel: usize,
    pub channel_count: usize,
    pub max_channels: usize,
}

impl OutputBase {
    pub fn new(start_channel: usize, channel_count: usize, max_channels: usize) -> Self {
        Self {
            start_channel,
            channel_count,
            max_channels,
        }
    }

    /// Reject configurations asking for more channels than the hardware
    /// takes, or reaching past the channel space
    pub fn check_limits(&self, name: &str) -> Result<()> {
        if self.max_channels > 0 && self.channel_count > self.max_channels {
            return Err(OutputError::config(format!(
                "{name}: channel count {} exceeds maximum of {}",
                self.channel_count, self.max_channels
            )));
        }
        let end = self.start_channel.checked_add(self.channel_count);
        if !matches!(end, Some(end) if end <= MAX_CHANNELS) {
            return Err(OutputError::config(format!(
                "{name}: channels {}+{} exceed the channel space of {}",
                self.start_channel, self.channel_count, MAX_CHANNELS
            )));
        }
        Ok(())
    }

    pub fn dump_config(&self) -> String {
        format!(
            "start channel {}, channel count {}, max channels {}",
            self.start_channel, self.channel_count, self.max_channels
        )
    }
}

/// Deserialize a driver's typed settings out of its raw config object
pub(crate) fn parse_settings<T: for<'de> Deserialize<'de>>(
    name: &str,
    config: &serde_json::Value,
) -> Result<T> {
    T::deserialize(config).map_err(|e| OutputError::config(format!("{name}: {e}")))
}

/// Build and initialize the output described by `config`
pub fn create_output(
    header: &OutputHeader,
    config: &serde_json::Value,
) -> Result<Box<dyn ChannelOutput>> {
    let start = header.start_channel;
    let count = header.channel_count;

    let driver: Box<dyn ChannelOutput> = match header.kind.as_str() {
        dt_pi_hat::TYPE_NAME => Box::new(DtPiHat::new(start, count)),
        spi_ws2801::TYPE_NAME => Box::new(SpiWs2801Output::new(start, count)),
        dmx::TYPE_NAME => Box::new(DmxOutput::new(start, count)),
        other => {
            return Err(OutputError::config(format!("unknown output type '{other}'")));
        }
    };

    // DMX always runs on its own cadence
    let mut output = if header.threaded || header.kind == dmx::TYPE_NAME {
        Box::new(ThreadedOutput::new(driver)) as Box<dyn ChannelOutput>
    } else {
        driver
    };

    output.init(config)?;
    Ok(output)
}
