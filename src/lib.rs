//! Channel output dispatch for a lighting controller
//!
//! A frame is one byte per logical channel. Each tick the [`OutputRegistry`]
//! hands the same immutable [`Frame`] to every active output; each output
//! remaps and brightness-corrects the channels it needs and pushes them
//! through its own transport:
//!
//! - [`output::DtPiHat`] - I2C pixel hat, one framed command per port
//! - [`output::SpiWs2801Output`] - WS2801 strings on spidev, with the Pi36 reorder
//! - [`output::DmxOutput`] - DMX universes over Art-Net or an ENTTEC USB Pro
//!
//! A failing output never stops the others: configuration and open errors
//! keep that output out of the registry, transport errors are logged and the
//! frame moves on.
//!
//! ```rust,no_run
//! use channel_output::{Frame, OutputRegistry};
//! use serde_json::json;
//!
//! let mut registry = OutputRegistry::from_config(&[json!({
//!     "type": "SPI-WS2801",
//!     "startChannel": 0,
//!     "channelCount": 54,
//!     "device": "spidev0.0",
//!     "pi36": 1
//! })]);
//!
//! registry.dispatch(&Frame::from(vec![255u8; 54]));
//! registry.close();
//! ```

pub mod brightness;
pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod pixel_string;
pub mod registry;
pub mod transport;

pub use error::{OutputError, Result};
pub use frame::{ChannelRange, Frame, MAX_CHANNELS};
pub use output::{create_output, ChannelOutput};
pub use registry::OutputRegistry;
