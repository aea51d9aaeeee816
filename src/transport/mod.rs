//! Transport adapters
//!
//! The only code that touches OS handles. Each adapter is a small trait so
//! drivers can be handed a different implementation (tests use in-memory
//! buses) through a connector closure.
//!
//! ## I2C
//! One `write()` on `/dev/i2c-N` is one bus transaction, so a framed command
//! must always go out in a single call.
//!
//! ## SPI
//! Duplex transfers through the spidev `SPI_IOC_MESSAGE` ioctl with the
//! receive side ignored.
//!
//! ## DMX
//! Streaming clients push one 512-slot universe per call: Art-Net over UDP or
//! an ENTTEC DMX USB Pro widget on a serial port.

pub mod dmx;
pub mod i2c;
pub mod spi;

#[cfg(test)]
pub(crate) mod mock;

pub use dmx::{ArtNetClient, DmxClient, DmxClientConfig, EnttecProClient, DMX_UNIVERSE_SIZE};
pub use i2c::{I2cBus, I2cConnector, LinuxI2c};
pub use spi::{LinuxSpi, SpiBus, SpiConnector};
