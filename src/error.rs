use std::borrow::Cow;
use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by caller-supplied SEL callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameters passed to `Device::open`.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(&'static str),

    /// The local device or socket could not be acquired.
    #[error("resource unavailable: {what}: {source}")]
    ResourceUnavailable {
        /// Device path or socket description.
        what: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out.
    #[error("timeout waiting for response")]
    Timeout,

    /// The handle is in non-blocking mode and the exchange cannot complete yet.
    #[error("operation would block")]
    WouldBlock,

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// An in-session response carried an unexpected session sequence number.
    #[error("session sequence mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SequenceMismatch {
        /// Sequence number the session expected next.
        expected: u32,
        /// Sequence number found in the response.
        actual: u32,
    },

    /// The BMC answered "node busy" (completion code C0h).
    #[error("BMC busy")]
    ControllerBusy,

    /// The local system interface is busy with another transaction.
    #[error("driver busy")]
    DriverBusy,

    /// A local-bus interface state machine fell out of step and was aborted.
    #[error("interface state error: {0}")]
    InterfaceState(&'static str),

    /// Transient failures persisted for every attempt allowed by the retry policy.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// The last transient error observed.
        last: Box<Error>,
    },

    /// The SEL reservation was cancelled by the BMC (completion code C5h).
    #[error("reservation cancelled")]
    ReservationCancelled,

    /// An IPMI command completed with a non-zero completion code.
    #[error("ipmi completion code {completion_code:#04x}: {reason}")]
    CompletionCode {
        /// Network function of the rejected request.
        netfn: u8,
        /// Command number of the rejected request.
        cmd: u8,
        /// Raw completion code returned by the BMC.
        completion_code: u8,
        /// Controller reason text (or the hex value when unrecognized).
        reason: Cow<'static, str>,
    },

    /// A multi-step IPMI operation could not be completed.
    #[error("ipmi error: {0}")]
    IpmiError(Cow<'static, str>),

    /// A fetched SEL record failed structural validation.
    #[error("invalid sel entry")]
    InvalidSelEntry,

    /// The requested field does not exist for the current record's class.
    #[error("field not valid for sel record type {record_type:#04x}")]
    InvalidForRecordType {
        /// Record type byte of the current record.
        record_type: u8,
    },

    /// Caller-supplied buffer too small.
    #[error("buffer overflow: need {needed} bytes, have {available}")]
    Overflow {
        /// Bytes required.
        needed: usize,
        /// Bytes available in the caller's buffer.
        available: usize,
    },

    /// The requested SEL record does not exist.
    #[error("sel record {0:#06x} not found")]
    NotFound(u16),

    /// No snapshot is available (parse has not succeeded or the log is empty).
    #[error("no sel entries available")]
    NoSelEntries,

    /// The cursor moved past the last record of the snapshot.
    #[error("end of sel entries list reached")]
    EndOfList,

    /// A caller-supplied per-record callback aborted enumeration.
    #[error("callback error: {0}")]
    Callback(#[source] CallbackError),

    /// The BMC refused the supplied credentials.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(&'static str),

    /// The requested privilege level was not granted.
    #[error("privilege insufficient: {0}")]
    PrivilegeInsufficient(&'static str),

    /// The BMC did not answer the session establishment probe.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The session was closed; open a new device.
    #[error("session is closed")]
    SessionClosed,

    /// Cryptographic failure (invalid key sizes, decrypt failure, etc.).
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    pub(crate) fn resource(what: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceUnavailable {
            what: what.into(),
            source,
        }
    }

    /// The completion code carried by this error, if any.
    ///
    /// `ControllerBusy` and `ReservationCancelled` report their wire codes
    /// (C0h and C5h) so callers can match on a single value.
    pub fn completion_code(&self) -> Option<u8> {
        match self {
            Self::CompletionCode {
                completion_code, ..
            } => Some(*completion_code),
            Self::ControllerBusy => Some(crate::completion::NODE_BUSY),
            Self::ReservationCancelled => Some(crate::completion::RESERVATION_CANCELLED),
            _ => None,
        }
    }

    /// Whether the dispatcher may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ControllerBusy | Self::DriverBusy | Self::InterfaceState(_)
        )
    }

    /// Whether this error came from the medium rather than the controller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Timeout
                | Self::Protocol(_)
                | Self::ProtocolOwned(_)
                | Self::SequenceMismatch { .. }
                | Self::SessionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_cancelled_report_wire_codes() {
        assert_eq!(Error::ControllerBusy.completion_code(), Some(0xC0));
        assert_eq!(Error::ReservationCancelled.completion_code(), Some(0xC5));
        assert_eq!(Error::Timeout.completion_code(), None);
    }

    #[test]
    fn transient_set_is_narrow() {
        assert!(Error::ControllerBusy.is_transient());
        assert!(Error::DriverBusy.is_transient());
        assert!(Error::InterfaceState("kcs error state").is_transient());
        assert!(!Error::Timeout.is_transient());
        assert!(!Error::ReservationCancelled.is_transient());
        assert!(
            !Error::CompletionCode {
                netfn: 0x0A,
                cmd: 0x43,
                completion_code: 0xCB,
                reason: Cow::Borrowed("x"),
            }
            .is_transient()
        );
    }

    #[test]
    fn completion_code_display_includes_reason() {
        let err = Error::CompletionCode {
            netfn: 0x06,
            cmd: 0x01,
            completion_code: 0xC1,
            reason: Cow::Borrowed("invalid command"),
        };
        assert_eq!(err.to_string(), "ipmi completion code 0xc1: invalid command");
    }
}
