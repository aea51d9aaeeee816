use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

// linux/i2c-dev.h
const I2C_TIMEOUT: u64 = 0x0702;
const I2C_SLAVE: u64 = 0x0703;

/// A bus bound to one peripheral address
pub trait I2cBus: Send {
    /// Send `buf` as a single transaction, returning the bytes written
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Opens a bus device and binds a peripheral address
pub type I2cConnector = Box<dyn Fn(&str, u16) -> io::Result<Box<dyn I2cBus>> + Send>;

/// `/dev/i2c-N` character device
pub struct LinuxI2c {
    file: File,
}

impl LinuxI2c {
    pub fn open(path: &str, address: u16, timeout: Duration) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();

        // SAFETY: fd is an open i2c-dev descriptor owned by `file`
        if unsafe { libc::ioctl(fd, I2C_SLAVE as _, address as libc::c_ulong) } < 0 {
            return Err(io::Error::last_os_error());
        }

        // Adapter timeout is in units of 10ms
        let ticks = (timeout.as_millis() / 10).max(1) as libc::c_ulong;
        if unsafe { libc::ioctl(fd, I2C_TIMEOUT as _, ticks) } < 0 {
            tracing::warn!(
                "Failed to set I2C timeout on {}: {}",
                path,
                io::Error::last_os_error()
            );
        }

        Ok(LinuxI2c { file })
    }

    /// Connector that opens real devices
    pub fn connector(timeout: Duration) -> I2cConnector {
        Box::new(move |path: &str, address: u16| -> io::Result<Box<dyn I2cBus>> {
            let bus = LinuxI2c::open(path, address, timeout)?;
            Ok(Box::new(bus) as Box<dyn I2cBus>)
        })
    }
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }
}
