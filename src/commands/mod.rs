//! Typed IPMI commands.
//!
//! Each command knows its netfn/cmd pair, how to encode its request data and
//! how to parse a successful response. Dispatch them with [`crate::Device::call`]
//! or [`crate::dispatch::call`].

mod app;
mod sel;
mod watchdog;

pub use app::{CloseSession, GetChannelAuthCapabilities, GetDeviceId, SetSessionPrivilegeLevel};
pub use sel::{
    ClearOperation, ClearSel, ClearStatus, DeleteSelEntry, GetSelEntry, GetSelInfo, ReserveSel,
    SelEntryResponse, SelInfo,
};
pub use watchdog::{GetWatchdogTimer, ResetWatchdogTimer};

use crate::completion;
use crate::error::Result;
use crate::types::{Lun, RawResponse, Request};

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: RawResponse) -> Result<Self::Output>;

    /// Target LUN.
    fn lun(&self) -> Lun {
        Lun::Bmc
    }

    /// The full request envelope.
    fn request(&self) -> Request {
        Request::new(Self::NETFN, Self::CMD, self.request_data()).with_lun(self.lun())
    }
}

pub(crate) fn ok_data(netfn: u8, response: &RawResponse) -> Result<&[u8]> {
    let code = response.completion_code;
    if code != completion::OK {
        let reason = completion::describe(netfn, response.cmd, code);
        return Err(completion::error_for(netfn, response.cmd, code, reason));
    }
    Ok(&response.data)
}
