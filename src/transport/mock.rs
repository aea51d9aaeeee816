//! In-memory transports for driver tests

use std::io;
use std::sync::{Arc, Mutex};

use super::dmx::{DmxClient, DMX_UNIVERSE_SIZE};
use super::i2c::{I2cBus, I2cConnector};
use super::spi::{SpiBus, SpiConnector};

pub(crate) type Log<T> = Arc<Mutex<Vec<T>>>;

/// Records every I2C transaction. Transactions whose index is listed in
/// `short_writes` report one byte fewer than requested; those listed in
/// `failed_writes` time out and are not recorded.
pub(crate) struct MockI2c {
    pub writes: Log<Vec<u8>>,
    pub short_writes: Vec<usize>,
    pub failed_writes: Vec<usize>,
    pub attempts: usize,
}

impl I2cBus for MockI2c {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let index = self.attempts;
        self.attempts += 1;
        if self.failed_writes.contains(&index) {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }

        self.writes.lock().unwrap().push(buf.to_vec());
        if self.short_writes.contains(&index) {
            Ok(buf.len() - 1)
        } else {
            Ok(buf.len())
        }
    }
}

pub(crate) fn i2c_connector(writes: Log<Vec<u8>>, short_writes: Vec<usize>) -> I2cConnector {
    flaky_i2c_connector(writes, short_writes, Vec::new())
}

pub(crate) fn flaky_i2c_connector(
    writes: Log<Vec<u8>>,
    short_writes: Vec<usize>,
    failed_writes: Vec<usize>,
) -> I2cConnector {
    Box::new(move |_path: &str, _address: u16| -> io::Result<Box<dyn I2cBus>> {
        Ok(Box::new(MockI2c {
            writes: Arc::clone(&writes),
            short_writes: short_writes.clone(),
            failed_writes: failed_writes.clone(),
            attempts: 0,
        }) as Box<dyn I2cBus>)
    })
}

pub(crate) fn failing_i2c_connector() -> I2cConnector {
    Box::new(|path: &str, _address: u16| -> io::Result<Box<dyn I2cBus>> {
        Err(io::Error::new(io::ErrorKind::NotFound, format!("{path} missing")))
    })
}

/// Records every transfer except those whose index is in `failed`, which
/// time out
pub(crate) struct MockSpi {
    pub transfers: Log<Vec<u8>>,
    pub failed: Vec<usize>,
    pub attempts: usize,
}

impl SpiBus for MockSpi {
    fn transfer(&mut self, tx: &[u8]) -> io::Result<()> {
        let index = self.attempts;
        self.attempts += 1;
        if self.failed.contains(&index) {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        self.transfers.lock().unwrap().push(tx.to_vec());
        Ok(())
    }
}

pub(crate) fn spi_connector(transfers: Log<Vec<u8>>) -> SpiConnector {
    flaky_spi_connector(transfers, Vec::new())
}

pub(crate) fn flaky_spi_connector(transfers: Log<Vec<u8>>, failed: Vec<usize>) -> SpiConnector {
    Box::new(move |_port: u8, _speed: u32| -> io::Result<Box<dyn SpiBus>> {
        Ok(Box::new(MockSpi {
            transfers: Arc::clone(&transfers),
            failed: failed.clone(),
            attempts: 0,
        }) as Box<dyn SpiBus>)
    })
}

pub(crate) fn failing_spi_connector() -> SpiConnector {
    Box::new(|_port: u8, _speed: u32| -> io::Result<Box<dyn SpiBus>> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    })
}

/// Records `(universe, slots)` per send. While `offline` is set every send
/// and reconnect fails.
pub(crate) struct MockDmx {
    pub sent: Log<(u16, Vec<u8>)>,
    pub offline: Arc<Mutex<bool>>,
}

impl DmxClient for MockDmx {
    fn send_dmx(&mut self, universe: u16, data: &[u8; DMX_UNIVERSE_SIZE]) -> io::Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        self.sent.lock().unwrap().push((universe, data.to_vec()));
        Ok(())
    }

    fn reconnect(&mut self) -> io::Result<()> {
        if *self.offline.lock().unwrap() {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
