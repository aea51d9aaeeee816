//! DMX universes over a streaming client (Art-Net or ENTTEC USB Pro)
//!
//! Each universe entry copies a contiguous run of frame channels into a
//! 512-slot DMX buffer starting at its DMX address. When the client loses its
//! connection frames are dropped, not queued; a reconnect is attempted at
//! most once per `RECONNECT_INTERVAL`.

use serde::Deserialize;
use std::fmt::Write as _;
use std::io;
use std::time::{Duration, Instant};

use super::{parse_settings, ChannelOutput, OutputBase};
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame, MAX_CHANNELS};
use crate::transport::{DmxClient, DmxClientConfig, DMX_UNIVERSE_SIZE};

pub const TYPE_NAME: &str = "DMX";

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Opens the streaming client named in the config
pub type DmxConnector = Box<dyn Fn(&DmxClientConfig) -> io::Result<Box<dyn DmxClient>> + Send>;

fn default_true() -> bool {
    true
}

fn default_address() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniverseConfig {
    #[serde(default = "default_true")]
    pub active: bool,
    pub universe: u16,
    /// First frame channel copied into the universe
    pub start_channel: usize,
    pub channel_count: usize,
    /// DMX slot (1-based) receiving the first channel
    #[serde(default = "default_address")]
    pub address: usize,
}

impl UniverseConfig {
    fn validate(&self) -> Result<()> {
        if self.channel_count == 0 || self.channel_count > DMX_UNIVERSE_SIZE {
            return Err(OutputError::config(format!(
                "universe {}: channel count {} must be 1-{}",
                self.universe, self.channel_count, DMX_UNIVERSE_SIZE
            )));
        }
        let last_slot = self
            .address
            .checked_sub(1)
            .and_then(|first| first.checked_add(self.channel_count));
        if !matches!(last_slot, Some(end) if end <= DMX_UNIVERSE_SIZE) {
            return Err(OutputError::config(format!(
                "universe {}: {} channels at address {} do not fit in {} slots",
                self.universe, self.channel_count, self.address, DMX_UNIVERSE_SIZE
            )));
        }
        if !matches!(self.start_channel.checked_add(self.channel_count), Some(end) if end <= MAX_CHANNELS) {
            return Err(OutputError::config(format!(
                "universe {}: channels {}+{} exceed the channel space",
                self.universe, self.start_channel, self.channel_count
            )));
        }
        Ok(())
    }

    fn channels(&self) -> ChannelRange {
        ChannelRange::span(self.start_channel, self.channel_count)
    }
}

#[derive(Debug, Deserialize)]
struct DmxSettings {
    universes: Vec<UniverseConfig>,
    client: DmxClientConfig,
}

pub struct DmxOutput {
    base: OutputBase,
    universes: Vec<UniverseConfig>,
    client: Option<Box<dyn DmxClient>>,
    connector: DmxConnector,
    connected: bool,
    last_attempt: Option<Instant>,
    reconnect_interval: Duration,
    slots: [u8; DMX_UNIVERSE_SIZE],
    dropped: u64,
}

impl DmxOutput {
    pub fn new(start_channel: usize, channel_count: usize) -> Self {
        Self::with_connector(start_channel, channel_count, Box::new(|config: &DmxClientConfig| config.connect()))
    }

    pub fn with_connector(start_channel: usize, channel_count: usize, connector: DmxConnector) -> Self {
        tracing::debug!("DmxOutput({}, {})", start_channel, channel_count);
        DmxOutput {
            base: OutputBase::new(start_channel, channel_count, 0),
            universes: Vec::new(),
            client: None,
            connector,
            connected: false,
            last_attempt: None,
            reconnect_interval: RECONNECT_INTERVAL,
            slots: [0u8; DMX_UNIVERSE_SIZE],
            dropped: 0,
        }
    }

    /// Frames dropped while the client was disconnected
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected
    }

    fn try_reconnect(&mut self, client: &mut dyn DmxClient) -> bool {
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.reconnect_interval {
                return false;
            }
        }
        self.last_attempt = Some(Instant::now());

        match client.reconnect() {
            Ok(()) => {
                tracing::info!("{} reconnected ({})", TYPE_NAME, client.describe());
                self.connected = true;
                true
            }
            Err(e) => {
                tracing::debug!("{} reconnect failed: {}", TYPE_NAME, e);
                false
            }
        }
    }
}

impl ChannelOutput for DmxOutput {
    fn name(&self) -> &str {
        TYPE_NAME
    }

    fn init(&mut self, config: &serde_json::Value) -> Result<()> {
        let settings: DmxSettings = parse_settings(TYPE_NAME, config)?;

        for universe in &settings.universes {
            universe.validate()?;
        }
        self.universes = settings.universes.into_iter().filter(|u| u.active).collect();

        self.base.max_channels = DMX_UNIVERSE_SIZE * self.universes.len().max(1);
        self.base.check_limits(TYPE_NAME)?;

        let client = (self.connector)(&settings.client).map_err(|e| {
            tracing::error!("Failed to connect DMX client {:?}: {}", settings.client, e);
            OutputError::open(format!("{:?}", settings.client), e)
        })?;

        if self.universes.len() > client.max_universes() {
            return Err(OutputError::config(format!(
                "{} carries at most {} universe(s), {} configured",
                client.describe(),
                client.max_universes(),
                self.universes.len()
            )));
        }

        tracing::info!(
            "{} ready: {} universes via {}",
            TYPE_NAME,
            self.universes.len(),
            client.describe()
        );
        self.client = Some(client);
        self.connected = true;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> usize {
        let Some(mut client) = self.client.take() else {
            return 0;
        };

        let handled = if self.connected || self.try_reconnect(client.as_mut()) {
            let mut ok = true;
            for universe in &self.universes {
                self.slots.fill(0);
                let first = universe.address - 1;
                for (i, slot) in self.slots[first..first + universe.channel_count]
                    .iter_mut()
                    .enumerate()
                {
                    *slot = frame.channel(universe.start_channel + i);
                }

                if let Err(e) = client.send_dmx(universe.universe, &self.slots) {
                    tracing::warn!(
                        "{}: lost connection sending universe {}: {}",
                        TYPE_NAME,
                        universe.universe,
                        e
                    );
                    self.connected = false;
                    self.last_attempt = Some(Instant::now());
                    ok = false;
                    break;
                }
            }
            ok
        } else {
            false
        };

        self.client = Some(client);

        if handled {
            self.base.channel_count
        } else {
            self.dropped += 1;
            0
        }
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("{} closed", TYPE_NAME);
        }
        self.connected = false;
    }

    fn required_channel_range(&self) -> ChannelRange {
        self.universes
            .iter()
            .fold(ChannelRange::EMPTY, |range, u| range.union(u.channels()))
    }

    fn channel_count(&self) -> usize {
        self.base.channel_count
    }

    fn dump_config(&self) -> String {
        let mut out = format!("{}: {}", TYPE_NAME, self.base.dump_config());
        if let Some(client) = &self.client {
            let _ = write!(out, "\n    client: {}", client.describe());
        }
        for u in &self.universes {
            let _ = write!(
                out,
                "\n    universe {}: channels {} -> address {}",
                u.universe,
                u.channels(),
                u.address
            );
        }
        out
    }
}
