use std::time::Duration;

use crate::error::Error;
use crate::types::{Request, TransportKind};

pub(crate) fn record_ok(
    transport: TransportKind,
    request: &Request,
    elapsed: Duration,
    completion_code: u8,
) {
    let transport = transport.as_str();
    let _ = (transport, request, elapsed, completion_code);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "transport" => transport, "outcome" => "ok")
            .increment(1);
        metrics::histogram!("ipmi_request_seconds", "transport" => transport)
            .record(elapsed.as_secs_f64());
        if completion_code != 0x00 {
            metrics::counter!("ipmi_completion_code_nonzero_total", "transport" => transport)
                .increment(1);
        }
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(
            transport,
            netfn = request.netfn,
            cmd = request.cmd,
            completion_code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "ipmi exchange ok"
        );
    }
}

pub(crate) fn record_err(
    transport: TransportKind,
    request: &Request,
    elapsed: Duration,
    err: &Error,
) {
    let transport = transport.as_str();
    let _ = (transport, request, elapsed, err);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_requests_total", "transport" => transport, "outcome" => "err")
            .increment(1);
        metrics::counter!(
            "ipmi_request_errors_total",
            "transport" => transport,
            "kind" => error_kind(err)
        )
        .increment(1);
        metrics::histogram!("ipmi_request_seconds", "transport" => transport)
            .record(elapsed.as_secs_f64());
    }

    #[cfg(feature = "tracing")]
    {
        // Non-blocking polls are expected to fail this way; keep them quiet.
        if matches!(err, Error::WouldBlock) {
            tracing::trace!(transport, netfn = request.netfn, cmd = request.cmd, "would block");
        } else {
            tracing::warn!(
                transport,
                netfn = request.netfn,
                cmd = request.cmd,
                error = %err,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "ipmi exchange failed"
            );
        }
    }
}

pub(crate) fn record_retry(request: &Request, attempt: u32, err: &Error) {
    let _ = (request, attempt, err);

    #[cfg(feature = "metrics")]
    metrics::counter!("ipmi_dispatch_retries_total").increment(1);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        netfn = request.netfn,
        cmd = request.cmd,
        attempt,
        error = %err,
        "transient failure, retrying"
    );
}

pub(crate) fn record_exhausted(request: &Request, attempts: u32, err: &Error) {
    let _ = (request, attempts, err);

    #[cfg(feature = "tracing")]
    tracing::warn!(
        netfn = request.netfn,
        cmd = request.cmd,
        attempts,
        error = %err,
        "retries exhausted"
    );
}

pub(crate) fn record_reservation(reservation_id: u16, renewals: u32) {
    let _ = (reservation_id, renewals);

    #[cfg(feature = "metrics")]
    if renewals > 0 {
        metrics::counter!("ipmi_sel_reservation_cancelled_total").increment(1);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(reservation_id, renewals, "sel reservation acquired");
}

pub(crate) fn record_sel_entry(record_id: u16, next_record_id: u16) {
    let _ = (record_id, next_record_id);

    #[cfg(feature = "tracing")]
    tracing::debug!(record_id, next_record_id, "sel entry fetched");
}

pub(crate) fn record_session(state: &'static str, detail: &str) {
    let _ = (state, detail);

    #[cfg(feature = "tracing")]
    tracing::debug!(state, detail, "lan session state");
}

#[cfg(feature = "metrics")]
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::ConfigInvalid(_) => "config_invalid",
        Error::ResourceUnavailable { .. } => "resource_unavailable",
        Error::Io(_) => "io",
        Error::Timeout => "timeout",
        Error::WouldBlock => "would_block",
        Error::Protocol(_) | Error::ProtocolOwned(_) => "protocol",
        Error::SequenceMismatch { .. } => "sequence_mismatch",
        Error::ControllerBusy => "controller_busy",
        Error::DriverBusy => "driver_busy",
        Error::InterfaceState(_) => "interface_state",
        Error::Exhausted { .. } => "exhausted",
        Error::ReservationCancelled => "reservation_cancelled",
        Error::CompletionCode { .. } => "completion_code",
        Error::IpmiError(_) => "ipmi",
        Error::InvalidSelEntry
        | Error::InvalidForRecordType { .. }
        | Error::Overflow { .. }
        | Error::NotFound(_)
        | Error::NoSelEntries
        | Error::EndOfList
        | Error::Callback(_) => "sel",
        Error::AuthenticationRejected(_) => "authentication",
        Error::PrivilegeInsufficient(_) => "privilege",
        Error::HostUnreachable(_) => "unreachable",
        Error::SessionClosed => "session_closed",
        Error::Crypto(_) => "crypto",
        Error::Unsupported(_) => "unsupported",
        Error::InvalidArgument(_) => "invalid_argument",
    }
}
