//! Transport backends behind [`crate::Device`].
//!
//! Each backend exchanges one request/response pair with the controller and
//! never retries at the command level; see [`crate::dispatch`].

#[cfg(unix)]
use std::os::fd::BorrowedFd;

use crate::error::{Error, Result};
use crate::transport::lan::SessionState;
use crate::types::{Lun, Mode, RawResponse, Request, TransportKind};

pub(crate) mod kcs;
pub(crate) mod lan;
// The state machine always builds; only the i2c-dev binding needs the feature.
#[cfg_attr(not(all(feature = "ssif", target_os = "linux")), allow(dead_code))]
pub(crate) mod ssif;

/// One medium, selected at open time.
pub(crate) trait Backend: Send {
    fn kind(&self) -> TransportKind;

    /// One exchange. Never retries busy completion codes.
    fn execute(&mut self, request: &Request) -> Result<RawResponse>;

    fn set_mode(&mut self, mode: Mode) -> Result<()>;

    fn session_state(&self) -> Option<SessionState> {
        None
    }

    /// Release the medium; network backends close their session first.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// System interface request: `[netfn << 2 | lun, cmd, data..]`.
pub(crate) fn encode_system_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + request.data.len());
    out.push((request.netfn << 2) | request.lun.as_u8());
    out.push(request.cmd);
    out.extend_from_slice(&request.data);
    out
}

/// Parse `[netfn << 2 | lun, cmd, cc, data..]` and check it answers `request`.
pub(crate) fn decode_system_response(request: &Request, bytes: &[u8]) -> Result<RawResponse> {
    if bytes.len() < 3 {
        return Err(Error::Protocol("system interface response too short"));
    }
    let netfn = bytes[0] >> 2;
    if netfn != request.netfn | 0x01 || Lun::from_bits(bytes[0]) != request.lun {
        return Err(Error::protocol_owned(format!(
            "response netfn/lun {:#04x} does not answer request netfn {:#04x}",
            bytes[0], request.netfn
        )));
    }
    if bytes[1] != request.cmd {
        return Err(Error::protocol_owned(format!(
            "response cmd {:#04x} does not answer request cmd {:#04x}",
            bytes[1], request.cmd
        )));
    }
    Ok(RawResponse {
        cmd: bytes[1],
        completion_code: bytes[2],
        data: bytes[3..].to_vec(),
    })
}

#[cfg(test)]
pub(crate) fn encode_system_response(request: &Request, cc: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![((request.netfn | 0x01) << 2) | request.lun.as_u8(), request.cmd, cc];
    out.extend_from_slice(data);
    out
}
