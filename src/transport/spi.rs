use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

// linux/spi/spidev.h, _IOW('k', nr, size)
const SPI_IOC_WR_MODE: u64 = 0x4001_6b01;
const SPI_IOC_WR_BITS_PER_WORD: u64 = 0x4001_6b03;
const SPI_IOC_WR_MAX_SPEED_HZ: u64 = 0x4004_6b04;
const SPI_IOC_MESSAGE_1: u64 = 0x4020_6b00;

/// Default spidev kernel buffer size
const SPIDEV_BUFSIZ: usize = 4096;

#[repr(C)]
#[derive(Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// A duplex SPI bus; only the transmit side is used
pub trait SpiBus: Send {
    fn transfer(&mut self, tx: &[u8]) -> io::Result<()>;
}

/// Opens SPI bus `port` at `speed_hz`
pub type SpiConnector = Box<dyn Fn(u8, u32) -> io::Result<Box<dyn SpiBus>> + Send>;

/// `/dev/spidev0.N` character device
pub struct LinuxSpi {
    file: File,
    speed_hz: u32,
}

impl LinuxSpi {
    pub fn open(port: u8, speed_hz: u32) -> io::Result<Self> {
        let path = format!("/dev/spidev0.{port}");
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let fd = file.as_raw_fd();

        let mode: u8 = 0;
        let bits: u8 = 8;
        // SAFETY: fd is an open spidev descriptor, arguments point at live locals
        unsafe {
            if libc::ioctl(fd, SPI_IOC_WR_MODE as _, &mode as *const u8) < 0
                || libc::ioctl(fd, SPI_IOC_WR_BITS_PER_WORD as _, &bits as *const u8) < 0
                || libc::ioctl(fd, SPI_IOC_WR_MAX_SPEED_HZ as _, &speed_hz as *const u32) < 0
            {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(LinuxSpi { file, speed_hz })
    }

    pub fn connector() -> SpiConnector {
        Box::new(|port: u8, speed_hz: u32| -> io::Result<Box<dyn SpiBus>> {
            let bus = LinuxSpi::open(port, speed_hz)?;
            Ok(Box::new(bus) as Box<dyn SpiBus>)
        })
    }
}

impl SpiBus for LinuxSpi {
    fn transfer(&mut self, tx: &[u8]) -> io::Result<()> {
        let fd = self.file.as_raw_fd();

        for chunk in tx.chunks(SPIDEV_BUFSIZ) {
            let xfer = SpiIocTransfer {
                tx_buf: chunk.as_ptr() as u64,
                len: chunk.len() as u32,
                speed_hz: self.speed_hz,
                bits_per_word: 8,
                ..Default::default()
            };
            // SAFETY: xfer references `chunk`, which outlives the call; rx_buf is null
            let sent = unsafe { libc::ioctl(fd, SPI_IOC_MESSAGE_1 as _, &xfer as *const SpiIocTransfer) };
            if sent < 0 {
                return Err(io::Error::last_os_error());
            }
            if sent as usize != chunk.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short SPI transfer: {} of {} bytes", sent, chunk.len()),
                ));
            }
        }

        Ok(())
    }
}
