//! KCS (Keyboard Controller Style) system interface, IPMI v2.0 section 9.
//!
//! The host drives a two-register handshake: a data register at the base
//! address and a status/command register `spacing` bytes above it.

#[cfg(unix)]
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::KcsConfig;
use crate::error::{Error, Result};
use crate::transport::{Backend, decode_system_response, encode_system_request};
use crate::types::{Mode, RawResponse, Request, TransportKind};

const STATUS_OBF: u8 = 0x01;
const STATUS_IBF: u8 = 0x02;
const STATE_MASK: u8 = 0xC0;

const CTRL_GET_STATUS_ABORT: u8 = 0x60;
const CTRL_WRITE_START: u8 = 0x61;
const CTRL_WRITE_END: u8 = 0x62;
const CTRL_READ: u8 = 0x68;

/// Largest response we accept before declaring the interface confused.
const MAX_RESPONSE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Read,
    Write,
    Error,
}

impl State {
    fn of(status: u8) -> Self {
        match status & STATE_MASK {
            0x00 => Self::Idle,
            0x40 => Self::Read,
            0x80 => Self::Write,
            _ => Self::Error,
        }
    }
}

/// Byte-wide I/O port access.
pub(crate) trait PortIo: Send {
    fn read(&mut self, port: u16) -> io::Result<u8>;
    fn write(&mut self, port: u16, value: u8) -> io::Result<()>;

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// Port I/O through `/dev/port` (needs CAP_SYS_RAWIO).
#[cfg(unix)]
#[derive(Debug)]
pub(crate) struct DevPort {
    file: File,
}

#[cfg(unix)]
impl DevPort {
    pub(crate) fn open(path: &std::path::Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::resource(path.display().to_string(), e))?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
impl PortIo for DevPort {
    fn read(&mut self, port: u16) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.file.read_exact_at(&mut buf, u64::from(port))?;
        Ok(buf[0])
    }

    fn write(&mut self, port: u16, value: u8) -> io::Result<()> {
        self.file.write_all_at(&[value], u64::from(port))
    }

    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.file.as_fd())
    }
}

pub(crate) struct KcsBackend<P: PortIo> {
    io: P,
    data_port: u16,
    status_port: u16,
    poll_interval: Duration,
    timeout: Duration,
    mode: Mode,
}

#[cfg(unix)]
impl KcsBackend<DevPort> {
    pub(crate) fn open(config: &KcsConfig) -> Result<Self> {
        let io = DevPort::open(&config.port_path)?;
        Self::with_io(io, config)
    }
}

impl<P: PortIo> KcsBackend<P> {
    /// Bind to the configured address and check that something answers there.
    pub(crate) fn with_io(io: P, config: &KcsConfig) -> Result<Self> {
        let base = config.address();
        let status_port = base
            .checked_add(u16::from(config.register_spacing))
            .ok_or(Error::ConfigInvalid("KCS status register address overflows"))?;

        let mut backend = Self {
            io,
            data_port: base,
            status_port,
            poll_interval: config.poll_interval,
            timeout: config.timeout,
            mode: config.mode,
        };

        // A floating bus reads all ones.
        if backend.status()? == 0xFF {
            return Err(Error::resource(
                format!("KCS interface at {base:#06x}"),
                io::Error::new(io::ErrorKind::NotFound, "no KCS interface responds"),
            ));
        }
        Ok(backend)
    }

    fn status(&mut self) -> Result<u8> {
        Ok(self.io.read(self.status_port)?)
    }

    fn write_command(&mut self, value: u8) -> Result<()> {
        Ok(self.io.write(self.status_port, value)?)
    }

    fn write_data(&mut self, value: u8) -> Result<()> {
        Ok(self.io.write(self.data_port, value)?)
    }

    fn read_data(&mut self) -> Result<u8> {
        Ok(self.io.read(self.data_port)?)
    }

    fn pause(&self) {
        if !self.poll_interval.is_zero() {
            thread::sleep(self.poll_interval);
        }
    }

    /// Poll the status register until `ready` holds or the phase times out.
    fn wait(&mut self, ready: impl Fn(u8) -> bool) -> Result<u8> {
        let start = Instant::now();
        loop {
            let status = self.status()?;
            if ready(status) {
                return Ok(status);
            }
            if start.elapsed() >= self.timeout {
                return Err(Error::Timeout);
            }
            self.pause();
        }
    }

    fn wait_ibf_clear(&mut self) -> Result<u8> {
        self.wait(|s| s & STATUS_IBF == 0)
    }

    fn wait_obf_set(&mut self) -> Result<u8> {
        self.wait(|s| s & STATUS_OBF != 0)
    }

    fn clear_obf(&mut self) -> Result<()> {
        if self.status()? & STATUS_OBF != 0 {
            self.read_data()?;
        }
        Ok(())
    }

    /// Wait for an idle interface before starting a transaction.
    fn wait_idle(&mut self) -> Result<()> {
        let start = Instant::now();
        loop {
            let status = self.status()?;
            match State::of(status) {
                State::Error => {
                    self.abort();
                    return Err(Error::InterfaceState("KCS interface was in error state"));
                }
                State::Idle if status & STATUS_IBF == 0 => {
                    if status & STATUS_OBF != 0 {
                        self.read_data()?;
                    }
                    return Ok(());
                }
                _ if self.mode == Mode::NonBlocking => return Err(Error::WouldBlock),
                _ if start.elapsed() >= self.timeout => return Err(Error::DriverBusy),
                _ => self.pause(),
            }
        }
    }

    /// Checked after every write-phase handshake.
    fn expect_state(&mut self, status: u8, expected: State) -> Result<()> {
        if State::of(status) == expected {
            return Ok(());
        }
        self.abort();
        Err(Error::InterfaceState(match expected {
            State::Write => "KCS interface left write state",
            State::Read => "KCS interface left read state",
            _ => "KCS interface in unexpected state",
        }))
    }

    /// GET_STATUS/ABORT recovery; leaves the interface idle when it succeeds.
    fn abort(&mut self) {
        // The caller reports the state error that triggered the abort.
        let _ = self.try_abort();
    }

    fn try_abort(&mut self) -> Result<()> {
        self.write_command(CTRL_GET_STATUS_ABORT)?;
        self.wait_ibf_clear()?;
        self.clear_obf()?;
        self.write_data(0x00)?;
        let status = self.wait_ibf_clear()?;
        if State::of(status) != State::Read {
            return Err(Error::InterfaceState("KCS abort did not reach read state"));
        }
        self.wait_obf_set()?;
        // Status code of the aborted transfer.
        self.read_data()?;
        self.write_data(CTRL_READ)?;
        let status = self.wait_ibf_clear()?;
        if State::of(status) != State::Idle {
            return Err(Error::InterfaceState("KCS abort did not reach idle state"));
        }
        self.wait_obf_set()?;
        self.read_data()?;
        Ok(())
    }

    fn transfer(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let Some((&last, body)) = request.split_last() else {
            return Err(Error::InvalidArgument("empty KCS request"));
        };

        self.wait_idle()?;

        // Write phase.
        self.write_command(CTRL_WRITE_START)?;
        let status = self.wait_ibf_clear()?;
        self.expect_state(status, State::Write)?;
        self.clear_obf()?;

        for &byte in body {
            self.write_data(byte)?;
            let status = self.wait_ibf_clear()?;
            self.expect_state(status, State::Write)?;
            self.clear_obf()?;
        }

        self.write_command(CTRL_WRITE_END)?;
        let status = self.wait_ibf_clear()?;
        self.expect_state(status, State::Write)?;
        self.clear_obf()?;
        self.write_data(last)?;

        // Read phase.
        let mut response = Vec::new();
        loop {
            let status = self.wait_ibf_clear()?;
            match State::of(status) {
                State::Read => {
                    self.wait_obf_set()?;
                    if response.len() == MAX_RESPONSE {
                        self.abort();
                        return Err(Error::Protocol("KCS response too long"));
                    }
                    response.push(self.read_data()?);
                    self.write_data(CTRL_READ)?;
                }
                State::Idle => {
                    self.wait_obf_set()?;
                    self.read_data()?;
                    return Ok(response);
                }
                _ => {
                    self.abort();
                    return Err(Error::InterfaceState("KCS interface error during read phase"));
                }
            }
        }
    }
}

impl<P: PortIo> Backend for KcsBackend<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Kcs
    }

    fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        let bytes = encode_system_request(request);
        crate::debug::dump_hex("kcs tx", &bytes);
        let response = self.transfer(&bytes)?;
        crate::debug::dump_hex("kcs rx", &response);
        decode_system_response(request, &response)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.io.readiness_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::transport::encode_system_response;

    const BASE: u16 = 0x0CA2;

    /// Register-level BMC that completes each handshake step instantly.
    struct SimKcs {
        state: u8,
        obf: bool,
        data_out: u8,
        write_end: bool,
        aborting: bool,
        request: Vec<u8>,
        response: VecDeque<u8>,
        handler: fn(&[u8]) -> Vec<u8>,

        absent: bool,
        stuck_busy: bool,
        /// Enter the error state once this many request bytes arrived.
        fail_after: Option<usize>,
        aborts: u32,
    }

    impl SimKcs {
        fn new(handler: fn(&[u8]) -> Vec<u8>) -> Self {
            Self {
                state: 0x00,
                obf: false,
                data_out: 0,
                write_end: false,
                aborting: false,
                request: Vec::new(),
                response: VecDeque::new(),
                handler,
                absent: false,
                stuck_busy: false,
                fail_after: None,
                aborts: 0,
            }
        }

        fn emit(&mut self, byte: u8) {
            self.data_out = byte;
            self.obf = true;
        }
    }

    impl PortIo for SimKcs {
        fn read(&mut self, port: u16) -> io::Result<u8> {
            if port == BASE {
                self.obf = false;
                return Ok(self.data_out);
            }
            if self.absent {
                return Ok(0xFF);
            }
            if self.stuck_busy {
                return Ok(0x80 | STATUS_IBF);
            }
            Ok(self.state | u8::from(self.obf))
        }

        fn write(&mut self, port: u16, value: u8) -> io::Result<()> {
            if port != BASE {
                match value {
                    CTRL_WRITE_START => {
                        self.request.clear();
                        self.state = 0x80;
                    }
                    CTRL_WRITE_END => self.write_end = true,
                    CTRL_GET_STATUS_ABORT => {
                        self.aborts += 1;
                        self.aborting = true;
                        self.fail_after = None;
                        self.state = 0x80;
                    }
                    _ => self.state = 0xC0,
                }
                return Ok(());
            }

            if self.aborting {
                match (self.state, value) {
                    (0x80, 0x00) => {
                        self.state = 0x40;
                        self.emit(0x00);
                    }
                    (0x40, CTRL_READ) => {
                        self.state = 0x00;
                        self.aborting = false;
                        self.emit(0x00);
                    }
                    _ => self.state = 0xC0,
                }
                return Ok(());
            }

            match self.state {
                0x80 => {
                    self.request.push(value);
                    if self.fail_after == Some(self.request.len()) {
                        self.state = 0xC0;
                    } else if self.write_end {
                        self.write_end = false;
                        self.response = (self.handler)(&self.request).into();
                        self.state = 0x40;
                        let first = self.response.pop_front().unwrap_or(0);
                        self.emit(first);
                    }
                }
                0x40 if value == CTRL_READ => match self.response.pop_front() {
                    Some(byte) => self.emit(byte),
                    None => {
                        self.state = 0x00;
                        self.emit(0x00);
                    }
                },
                _ => self.state = 0xC0,
            }
            Ok(())
        }
    }

    fn echo_device_id(request: &[u8]) -> Vec<u8> {
        let parsed = Request::new(request[0] >> 2, request[1], request[2..].to_vec());
        encode_system_response(&parsed, 0x00, &[0x20, 0x81, 0x02, 0x10, 0x02])
    }

    fn config() -> KcsConfig {
        KcsConfig::new()
            .poll_interval(Duration::ZERO)
            .timeout(Duration::from_millis(20))
    }

    fn backend(sim: SimKcs) -> KcsBackend<SimKcs> {
        KcsBackend::with_io(sim, &config()).expect("open")
    }

    #[test]
    fn full_transaction() {
        let mut kcs = backend(SimKcs::new(echo_device_id));
        let request = Request::new(0x06, 0x01, vec![0xAA, 0xBB]);
        let response = kcs.execute(&request).expect("execute");

        assert_eq!(kcs.io.request, vec![0x18, 0x01, 0xAA, 0xBB]);
        assert_eq!(response.cmd, 0x01);
        assert_eq!(response.completion_code, 0x00);
        assert_eq!(response.data, vec![0x20, 0x81, 0x02, 0x10, 0x02]);
        assert_eq!(kcs.io.state, 0x00);
    }

    #[test]
    fn single_byte_request_goes_straight_to_write_end() {
        fn reply(request: &[u8]) -> Vec<u8> {
            vec![request[0] | 0x04, 0x00, 0x00]
        }
        let mut kcs = backend(SimKcs::new(reply));
        let raw = kcs.transfer(&[0x18]).expect("transfer");
        assert_eq!(raw, vec![0x1C, 0x00, 0x00]);
    }

    #[test]
    fn floating_bus_is_resource_unavailable() {
        let mut sim = SimKcs::new(echo_device_id);
        sim.absent = true;
        let err = KcsBackend::with_io(sim, &config()).err().expect("must fail");
        assert!(matches!(err, Error::ResourceUnavailable { .. }));
    }

    #[test]
    fn busy_interface() {
        let mut kcs = backend(SimKcs::new(echo_device_id));
        kcs.io.stuck_busy = true;
        let request = Request::new(0x06, 0x01, Vec::new());

        assert!(matches!(kcs.execute(&request), Err(Error::DriverBusy)));

        kcs.set_mode(Mode::NonBlocking).expect("mode");
        assert!(matches!(kcs.execute(&request), Err(Error::WouldBlock)));
    }

    #[test]
    fn error_state_mid_write_aborts_and_recovers() {
        let mut kcs = backend(SimKcs::new(echo_device_id));
        kcs.io.fail_after = Some(1);
        let request = Request::new(0x06, 0x01, vec![0x01]);

        let err = kcs.execute(&request).unwrap_err();
        assert!(matches!(err, Error::InterfaceState(_)));
        assert!(err.is_transient());
        assert_eq!(kcs.io.aborts, 1);
        assert_eq!(kcs.io.state, 0x00);

        kcs.execute(&request).expect("interface recovered");
    }

    #[test]
    fn mismatched_response_is_rejected() {
        fn wrong_cmd(request: &[u8]) -> Vec<u8> {
            vec![request[0] | 0x04, request[1].wrapping_add(1), 0x00]
        }
        let mut kcs = backend(SimKcs::new(wrong_cmd));
        let err = kcs.execute(&Request::new(0x06, 0x01, Vec::new())).unwrap_err();
        assert!(matches!(err, Error::ProtocolOwned(_)));
    }
}
