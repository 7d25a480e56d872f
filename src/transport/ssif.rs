//! SSIF (SMBus System Interface), IPMI v2.0 section 12.
//!
//! Requests longer than one SMBus block go out as start/middle/end writes;
//! long responses come back as a start block tagged `00 01` followed by
//! numbered middle blocks, the last numbered FFh.

use std::io;
#[cfg(unix)]
use std::os::fd::BorrowedFd;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SsifConfig;
use crate::error::{Error, Result};
use crate::transport::{Backend, decode_system_response, encode_system_request};
use crate::types::{Mode, RawResponse, Request, TransportKind};

const SMBUS_BLOCK_MAX: usize = 32;

const WRITE_SINGLE: u8 = 0x02;
const READ_START: u8 = 0x03;
const WRITE_START: u8 = 0x06;
const WRITE_MIDDLE: u8 = 0x07;
const WRITE_END: u8 = 0x08;
const READ_MIDDLE: u8 = 0x09;

const MULTIPART_READ_TAG: [u8; 2] = [0x00, 0x01];
const LAST_BLOCK: u8 = 0xFF;

/// SMBus block transfers to one slave address.
pub(crate) trait SmbusIo: Send {
    fn block_write(&mut self, command: u8, data: &[u8]) -> io::Result<()>;

    /// Fails while the BMC NACKs (response not ready).
    fn block_read(&mut self, command: u8) -> io::Result<Vec<u8>>;

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

#[cfg(all(feature = "ssif", target_os = "linux"))]
pub(crate) use i2c::I2cDevice;

#[cfg(all(feature = "ssif", target_os = "linux"))]
#[allow(unsafe_code)]
mod i2c {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
    use std::path::Path;

    use nix::{ioctl_readwrite_bad, ioctl_write_int_bad};

    use super::{SMBUS_BLOCK_MAX, SmbusIo};
    use crate::error::{Error, Result};

    // linux/i2c-dev.h, linux/i2c.h
    const I2C_SLAVE: u16 = 0x0703;
    const I2C_SMBUS: u16 = 0x0720;
    const I2C_SMBUS_WRITE: u8 = 0;
    const I2C_SMBUS_READ: u8 = 1;
    const I2C_SMBUS_BLOCK_DATA: u32 = 5;

    /// `union i2c_smbus_data`; the block member is the largest.
    #[repr(C)]
    struct SmbusData {
        block: [u8; SMBUS_BLOCK_MAX + 2],
    }

    /// `struct i2c_smbus_ioctl_data`.
    #[repr(C)]
    struct SmbusIoctlData {
        read_write: u8,
        command: u8,
        size: u32,
        data: *mut SmbusData,
    }

    ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);
    ioctl_readwrite_bad!(smbus_access, I2C_SMBUS, SmbusIoctlData);

    /// An i2c-dev character device bound to the BMC's slave address.
    #[derive(Debug)]
    pub(crate) struct I2cDevice {
        file: File,
    }

    impl I2cDevice {
        pub(crate) fn open(path: &Path, address: u8) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| Error::resource(path.display().to_string(), e))?;

            // SAFETY: the descriptor stays open for the duration of the call.
            unsafe { set_slave_address(file.as_raw_fd(), address.into()) }.map_err(|errno| {
                Error::resource(
                    format!("{} slave {address:#04x}", path.display()),
                    io::Error::from(errno),
                )
            })?;
            Ok(Self { file })
        }

        fn access(&self, read_write: u8, command: u8, data: &mut SmbusData) -> io::Result<()> {
            let mut args = SmbusIoctlData {
                read_write,
                command,
                size: I2C_SMBUS_BLOCK_DATA,
                data,
            };
            // SAFETY: `args` and `data` outlive the call and match the kernel layout.
            unsafe { smbus_access(self.file.as_raw_fd(), &mut args) }
                .map(drop)
                .map_err(io::Error::from)
        }
    }

    impl SmbusIo for I2cDevice {
        fn block_write(&mut self, command: u8, data: &[u8]) -> io::Result<()> {
            if data.is_empty() || data.len() > SMBUS_BLOCK_MAX {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "SMBus block must hold 1..=32 bytes",
                ));
            }
            let mut buf = SmbusData {
                block: [0; SMBUS_BLOCK_MAX + 2],
            };
            buf.block[0] = data.len() as u8;
            buf.block[1..=data.len()].copy_from_slice(data);
            self.access(I2C_SMBUS_WRITE, command, &mut buf)
        }

        fn block_read(&mut self, command: u8) -> io::Result<Vec<u8>> {
            let mut buf = SmbusData {
                block: [0; SMBUS_BLOCK_MAX + 2],
            };
            self.access(I2C_SMBUS_READ, command, &mut buf)?;
            let len = usize::from(buf.block[0]).min(SMBUS_BLOCK_MAX);
            Ok(buf.block[1..=len].to_vec())
        }

        fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
            Some(self.file.as_fd())
        }
    }
}

/// A request written to the BMC whose response has not been read yet.
#[derive(Debug)]
struct Pending {
    request: Request,
    written_at: Instant,
}

pub(crate) struct SsifBackend<S: SmbusIo> {
    bus: S,
    poll_interval: Duration,
    timeout: Duration,
    mode: Mode,
    pending: Option<Pending>,
}

#[cfg(all(feature = "ssif", target_os = "linux"))]
impl SsifBackend<I2cDevice> {
    pub(crate) fn open(config: &SsifConfig) -> Result<Self> {
        let bus = I2cDevice::open(&config.device_path, config.address)?;
        Ok(Self::new(bus, config))
    }
}

impl<S: SmbusIo> SsifBackend<S> {
    pub(crate) fn new(bus: S, config: &SsifConfig) -> Self {
        Self {
            bus,
            poll_interval: config.poll_interval,
            timeout: config.timeout,
            mode: config.mode,
            pending: None,
        }
    }

    fn pause(&self) {
        if !self.poll_interval.is_zero() {
            thread::sleep(self.poll_interval);
        }
    }

    /// One block write, repeated while the BMC NACKs.
    fn write_block(&mut self, command: u8, chunk: &[u8]) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.bus.block_write(command, chunk) {
                Ok(()) => return Ok(()),
                Err(e) if start.elapsed() >= self.timeout => return Err(Error::Io(e)),
                Err(_) => self.pause(),
            }
        }
    }

    fn write_request(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() <= SMBUS_BLOCK_MAX {
            return self.write_block(WRITE_SINGLE, bytes);
        }

        let chunks: Vec<&[u8]> = bytes.chunks(SMBUS_BLOCK_MAX).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let command = match i {
                0 => WRITE_START,
                i if i == last => WRITE_END,
                _ => WRITE_MIDDLE,
            };
            self.write_block(command, chunk)?;
        }
        Ok(())
    }

    fn read_response(&mut self, pending: Pending) -> Result<Vec<u8>> {
        loop {
            match self.bus.block_read(READ_START) {
                Ok(first) => return self.read_remaining(first),
                Err(_) if pending.written_at.elapsed() >= self.timeout => {
                    return Err(Error::Timeout);
                }
                Err(_) if self.mode == Mode::NonBlocking => {
                    self.pending = Some(pending);
                    return Err(Error::WouldBlock);
                }
                Err(_) => self.pause(),
            }
        }
    }

    fn read_remaining(&mut self, first: Vec<u8>) -> Result<Vec<u8>> {
        if first.len() < SMBUS_BLOCK_MAX || !first.starts_with(&MULTIPART_READ_TAG) {
            return Ok(first);
        }

        let mut response = first[MULTIPART_READ_TAG.len()..].to_vec();
        let mut expected: u8 = 0;
        loop {
            let block = self.bus.block_read(READ_MIDDLE)?;
            let (&number, payload) = block
                .split_first()
                .ok_or(Error::Protocol("empty SSIF middle block"))?;
            if number != LAST_BLOCK && number != expected {
                return Err(Error::protocol_owned(format!(
                    "SSIF block {number:#04x} out of sequence, expected {expected:#04x}"
                )));
            }
            response.extend_from_slice(payload);
            if number == LAST_BLOCK {
                return Ok(response);
            }
            expected = expected.wrapping_add(1);
        }
    }
}

impl<S: SmbusIo> Backend for SsifBackend<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Ssif
    }

    fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        let pending = match self.pending.take() {
            Some(pending) if pending.request == *request => pending,
            Some(pending) => {
                // The BMC still holds the earlier response.
                self.pending = Some(pending);
                return Err(Error::InvalidArgument(
                    "another SSIF request is awaiting its response",
                ));
            }
            None => {
                let bytes = encode_system_request(request);
                crate::debug::dump_hex("ssif tx", &bytes);
                self.write_request(&bytes)?;
                Pending {
                    request: request.clone(),
                    written_at: Instant::now(),
                }
            }
        };

        let response = self.read_response(pending)?;
        crate::debug::dump_hex("ssif rx", &response);
        decode_system_response(request, &response)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.bus.readiness_fd()
    }
}
