use std::borrow::Cow;
#[cfg(unix)]
use std::os::fd::BorrowedFd;
use std::time::Instant;

use crate::commands::Command;
use crate::completion::{self, CompletionCodeTable};
use crate::config::DeviceConfig;
use crate::dispatch::{self, RetryPolicy};
use crate::error::{Error, Result};
use crate::transport::Backend;
use crate::transport::lan::{LanBackend, SessionState};
use crate::types::{Lun, Mode, RawResponse, Request, TransportKind};

/// One request/response exchange with a controller.
///
/// [`Device`] implements this; the dispatcher and [`crate::SelEngine`] are
/// generic over it so they can run against scripted peers.
pub trait Exchange {
    /// Send `request` and return the controller's response, without retrying.
    fn execute(&mut self, request: &Request) -> Result<RawResponse>;

    /// Text for a non-zero completion code returned by (netfn, cmd).
    fn describe_completion(&self, netfn: u8, cmd: u8, code: u8) -> Cow<'static, str> {
        completion::describe(netfn, cmd, code)
    }
}

impl<E: Exchange + ?Sized> Exchange for &mut E {
    fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        (**self).execute(request)
    }

    fn describe_completion(&self, netfn: u8, cmd: u8, code: u8) -> Cow<'static, str> {
        (**self).describe_completion(netfn, cmd, code)
    }
}

/// An open connection to a BMC over KCS, SSIF or RMCP+ LAN.
///
/// Owning a `Device` means the underlying file or session is live. It is
/// released by [`Device::close`] or, without a Close Session exchange, on drop.
/// A device is not internally synchronized; share it across threads behind a
/// mutex.
pub struct Device {
    backend: Box<dyn Backend>,
    mode: Mode,
    last_target: Option<(Lun, u8)>,
    codes: CompletionCodeTable,
}

impl Device {
    /// Validate `config`, acquire the medium and, for LAN, establish the session.
    pub fn open(config: impl Into<DeviceConfig>) -> Result<Self> {
        let config = config.into();
        config.validate()?;

        let (backend, mode): (Box<dyn Backend>, Mode) = match &config {
            DeviceConfig::Kcs(kcs) => (open_kcs(kcs)?, kcs.mode),
            DeviceConfig::Ssif(ssif) => (open_ssif(ssif)?, ssif.mode),
            DeviceConfig::Lan(lan) => (Box::new(LanBackend::connect(lan)?), lan.mode),
        };
        Ok(Self::from_backend(backend, mode))
    }

    pub(crate) fn from_backend(backend: Box<dyn Backend>, mode: Mode) -> Self {
        Self {
            backend,
            mode,
            last_target: None,
            codes: CompletionCodeTable::new(),
        }
    }

    /// The medium this device talks over.
    pub fn transport(&self) -> TransportKind {
        self.backend.kind()
    }

    /// Current blocking mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch between blocking and non-blocking exchanges.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.backend.set_mode(mode)?;
        self.mode = mode;
        Ok(())
    }

    /// LUN and netfn of the most recent request.
    pub fn last_target(&self) -> Option<(Lun, u8)> {
        self.last_target
    }

    /// LAN session state; `None` for local-bus transports.
    pub fn session_state(&self) -> Option<SessionState> {
        self.backend.session_state()
    }

    /// Replace the table used to name non-zero completion codes.
    pub fn set_completion_codes(&mut self, codes: CompletionCodeTable) {
        self.codes = codes;
    }

    /// One exchange. Busy completion codes are returned as-is, not retried.
    pub fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        request.validate()?;
        self.last_target = Some((request.lun, request.netfn));

        let kind = self.backend.kind();
        let started = Instant::now();
        let result = self.backend.execute(request);
        match &result {
            Ok(response) => {
                crate::observe::record_ok(kind, request, started.elapsed(), response.completion_code)
            }
            Err(err) => crate::observe::record_err(kind, request, started.elapsed(), err),
        }
        result
    }

    /// Execute a pre-encoded command: `bytes` is `[cmd, data..]`.
    ///
    /// Returns `[cmd, completion_code, data..]`.
    pub fn execute_raw(&mut self, netfn: u8, bytes: &[u8]) -> Result<Vec<u8>> {
        let (&cmd, data) = bytes
            .split_first()
            .ok_or(Error::InvalidArgument("raw command needs at least a command byte"))?;
        let response = self.execute(&Request::new(netfn, cmd, data.to_vec()))?;
        Ok(response.to_bytes())
    }

    /// Execute with bounded retry; see [`crate::dispatch::dispatch`].
    pub fn dispatch(&mut self, request: &Request, policy: &RetryPolicy) -> Result<RawResponse> {
        dispatch::dispatch(self, request, policy)
    }

    /// Dispatch a typed command and parse its response.
    pub fn call<C: Command>(&mut self, command: &C, policy: &RetryPolicy) -> Result<C::Output> {
        dispatch::call(self, command, policy)
    }

    /// Close the session (LAN) and release the medium.
    ///
    /// The medium is released even when the close exchange fails; the error
    /// is still reported.
    pub fn close(mut self) -> Result<()> {
        self.backend.close()
    }

    /// File descriptor to poll before retrying a [`Error::WouldBlock`] exchange.
    #[cfg(unix)]
    pub fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.backend.readiness_fd()
    }
}

impl Exchange for Device {
    fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        Device::execute(self, request)
    }

    fn describe_completion(&self, netfn: u8, cmd: u8, code: u8) -> Cow<'static, str> {
        self.codes.describe(netfn, cmd, code)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("transport", &self.backend.kind())
            .field("mode", &self.mode)
            .field("session_state", &self.backend.session_state())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn open_kcs(config: &crate::config::KcsConfig) -> Result<Box<dyn Backend>> {
    Ok(Box::new(crate::transport::kcs::KcsBackend::open(config)?))
}

#[cfg(not(unix))]
fn open_kcs(_config: &crate::config::KcsConfig) -> Result<Box<dyn Backend>> {
    Err(Error::Unsupported("KCS needs /dev/port"))
}

#[cfg(all(feature = "ssif", target_os = "linux"))]
fn open_ssif(config: &crate::config::SsifConfig) -> Result<Box<dyn Backend>> {
    Ok(Box::new(crate::transport::ssif::SsifBackend::open(config)?))
}

#[cfg(not(all(feature = "ssif", target_os = "linux")))]
fn open_ssif(_config: &crate::config::SsifConfig) -> Result<Box<dyn Backend>> {
    Err(Error::Unsupported("SSIF needs Linux i2c-dev and the `ssif` feature"))
}
