//! Completion code names.
//!
//! Generic codes (C0h-FFh) come from the IPMI v2.0 table 5-2; command-specific
//! codes (80h-BEh) are keyed by (netfn, cmd). Vendors can layer extra entries on
//! top with [`CompletionCodeTable`].

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::Error;

/// Command completed normally.
pub const OK: u8 = 0x00;
/// Node busy.
pub const NODE_BUSY: u8 = 0xC0;
/// Invalid command.
pub const INVALID_COMMAND: u8 = 0xC1;
/// Reservation cancelled or invalid reservation ID.
pub const RESERVATION_CANCELLED: u8 = 0xC5;
/// Requested sensor, data, or record not present.
pub const NOT_PRESENT: u8 = 0xCB;
/// Invalid data field in request.
pub const INVALID_DATA_FIELD: u8 = 0xCC;
/// Insufficient privilege level.
pub const INSUFFICIENT_PRIVILEGE: u8 = 0xD4;

const GENERIC: &[(u8, &str)] = &[
    (0xC0, "node busy"),
    (0xC1, "invalid command"),
    (0xC2, "command invalid for given LUN"),
    (0xC3, "timeout while processing command"),
    (0xC4, "out of space"),
    (0xC5, "reservation cancelled or invalid reservation ID"),
    (0xC6, "request data truncated"),
    (0xC7, "request data length invalid"),
    (0xC8, "request data field length limit exceeded"),
    (0xC9, "parameter out of range"),
    (0xCA, "cannot return number of requested data bytes"),
    (0xCB, "requested sensor, data, or record not present"),
    (0xCC, "invalid data field in request"),
    (0xCD, "command illegal for specified sensor or record type"),
    (0xCE, "command response could not be provided"),
    (0xCF, "cannot execute duplicated request"),
    (0xD0, "SDR repository in update mode"),
    (0xD1, "device in firmware update mode"),
    (0xD2, "BMC initialization or initialization agent in progress"),
    (0xD3, "destination unavailable"),
    (0xD4, "insufficient privilege level"),
    (0xD5, "command not supported in present state"),
    (0xD6, "command sub-function disabled or unavailable"),
    (0xFF, "unspecified error"),
];

// (netfn, cmd, code, text)
const COMMAND_SPECIFIC: &[(u8, u8, u8, &str)] = &[
    (0x06, 0x22, 0x80, "attempt to start un-initialized watchdog"),
    (0x06, 0x3B, 0x80, "requested level not available for this user"),
    (
        0x06,
        0x3B,
        0x81,
        "requested level exceeds channel and/or user privilege limit",
    ),
    (0x06, 0x3B, 0x82, "cannot disable user level authentication"),
    (0x06, 0x3C, 0x87, "invalid session ID in request"),
    (0x06, 0x3C, 0x88, "invalid session handle in request"),
    (0x0A, 0x42, 0x81, "cannot execute command, SEL erase in progress"),
    (0x0A, 0x43, 0x81, "cannot execute command, SEL erase in progress"),
    (0x0A, 0x46, 0x80, "operation not supported for this record type"),
    (0x0A, 0x46, 0x81, "cannot execute command, SEL erase in progress"),
    (0x0A, 0x47, 0x81, "cannot execute command, SEL erase in progress"),
];

/// Describe a completion code using the built-in tables.
///
/// Unrecognized codes render as their hex value.
pub fn describe(netfn: u8, cmd: u8, code: u8) -> Cow<'static, str> {
    if code == OK {
        return Cow::Borrowed("command completed normally");
    }

    let request_netfn = netfn & !0x01;
    if let Some(&(_, _, _, text)) = COMMAND_SPECIFIC
        .iter()
        .find(|&&(n, c, cc, _)| n == request_netfn && c == cmd && cc == code)
    {
        return Cow::Borrowed(text);
    }

    match GENERIC.iter().find(|&&(cc, _)| cc == code) {
        Some(&(_, text)) => Cow::Borrowed(text),
        None => Cow::Owned(format!("completion code {code:#04x}")),
    }
}

/// Caller-extensible completion code names.
///
/// Lookups fall through to the built-in tables when no vendor entry matches.
#[derive(Debug, Clone, Default)]
pub struct CompletionCodeTable {
    command: HashMap<(u8, u8, u8), Cow<'static, str>>,
    generic: HashMap<u8, Cow<'static, str>>,
}

impl CompletionCodeTable {
    /// A table holding only the built-in entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or override) a command-specific entry.
    pub fn with_command_code(
        mut self,
        netfn: u8,
        cmd: u8,
        code: u8,
        text: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.command.insert((netfn & !0x01, cmd, code), text.into());
        self
    }

    /// Add (or override) an entry that applies to every command.
    pub fn with_code(mut self, code: u8, text: impl Into<Cow<'static, str>>) -> Self {
        self.generic.insert(code, text.into());
        self
    }

    /// Describe `code` as returned for (netfn, cmd).
    pub fn describe(&self, netfn: u8, cmd: u8, code: u8) -> Cow<'static, str> {
        if let Some(text) = self.command.get(&(netfn & !0x01, cmd, code)) {
            return text.clone();
        }
        if let Some(text) = self.generic.get(&code) {
            return text.clone();
        }
        describe(netfn, cmd, code)
    }
}

/// Build the error for a non-zero completion code.
pub(crate) fn error_for(netfn: u8, cmd: u8, code: u8, reason: Cow<'static, str>) -> Error {
    match code {
        NODE_BUSY => Error::ControllerBusy,
        RESERVATION_CANCELLED => Error::ReservationCancelled,
        _ => Error::CompletionCode {
            netfn,
            cmd,
            completion_code: code,
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_codes_are_named() {
        assert_eq!(describe(0x0A, 0x43, 0xCB), "requested sensor, data, or record not present");
        assert_eq!(describe(0x06, 0x01, 0xFF), "unspecified error");
    }

    #[test]
    fn command_specific_codes_take_precedence() {
        assert_eq!(
            describe(0x06, 0x22, 0x80),
            "attempt to start un-initialized watchdog"
        );
        // Response netfn resolves to the same entry.
        assert_eq!(describe(0x07, 0x22, 0x80), "attempt to start un-initialized watchdog");
        // Same code on another command is unknown.
        assert_eq!(describe(0x06, 0x01, 0x80), "completion code 0x80");
    }

    #[test]
    fn vendor_entries_override_and_fall_back() {
        let table = CompletionCodeTable::new()
            .with_command_code(0x30, 0x12, 0x80, "vendor: flash locked")
            .with_code(0xC0, "controller still booting");

        assert_eq!(table.describe(0x30, 0x12, 0x80), "vendor: flash locked");
        assert_eq!(table.describe(0x06, 0x01, 0xC0), "controller still booting");
        assert_eq!(table.describe(0x06, 0x01, 0xC1), "invalid command");
        assert_eq!(table.describe(0x06, 0x01, 0x9A), "completion code 0x9a");
    }

    #[test]
    fn busy_and_cancelled_map_to_dedicated_errors() {
        assert!(matches!(
            error_for(0x0A, 0x43, 0xC0, describe(0x0A, 0x43, 0xC0)),
            Error::ControllerBusy
        ));
        assert!(matches!(
            error_for(0x0A, 0x43, 0xC5, describe(0x0A, 0x43, 0xC5)),
            Error::ReservationCancelled
        ));
        assert!(matches!(
            error_for(0x0A, 0x43, 0xCB, describe(0x0A, 0x43, 0xCB)),
            Error::CompletionCode {
                completion_code: 0xCB,
                ..
            }
        ));
    }
}
