use std::collections::VecDeque;
use std::time::Duration;

use bmc_ipmi::commands::GetDeviceId;
use bmc_ipmi::dispatch::{call, dispatch};
use bmc_ipmi::{Error, Exchange, RawResponse, Request, Result, RetryPolicy};

/// Replays canned results, one per execute.
struct Script {
    replies: VecDeque<Result<RawResponse>>,
    attempts: u32,
}

impl Script {
    fn new(replies: impl IntoIterator<Item = Result<RawResponse>>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            attempts: 0,
        }
    }
}

impl Exchange for Script {
    fn execute(&mut self, _request: &Request) -> Result<RawResponse> {
        self.attempts += 1;
        self.replies.pop_front().unwrap_or(Err(Error::Timeout))
    }
}

fn cc(code: u8) -> Result<RawResponse> {
    Ok(RawResponse {
        cmd: 0x01,
        completion_code: code,
        data: Vec::new(),
    })
}

fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO)
}

fn request() -> Request {
    Request::new(0x06, 0x01, Vec::new())
}

#[test]
fn busy_shorter_than_policy_eventually_succeeds() {
    for busy in 0..5 {
        let mut replies: Vec<_> = (0..busy).map(|_| cc(0xC0)).collect();
        replies.push(cc(0x00));
        let mut script = Script::new(replies);

        let response = dispatch(&mut script, &request(), &policy(5)).expect("dispatch");
        assert!(response.is_success());
        assert_eq!(script.attempts, busy + 1);
    }
}

#[test]
fn busy_for_every_attempt_is_exhausted() {
    let mut script = Script::new((0..10).map(|_| cc(0xC0)));
    let err = dispatch(&mut script, &request(), &policy(5)).unwrap_err();

    match err {
        Error::Exhausted { attempts, last } => {
            assert_eq!(attempts, 5);
            assert!(matches!(*last, Error::ControllerBusy));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(script.attempts, 5);
}

#[test]
fn driver_busy_and_interface_errors_are_retried() {
    let mut script = Script::new([
        Err(Error::DriverBusy),
        Err(Error::InterfaceState("kcs error state")),
        cc(0x00),
    ]);
    dispatch(&mut script, &request(), &policy(3)).expect("dispatch");
    assert_eq!(script.attempts, 3);
}

#[test]
fn non_busy_codes_are_never_retried() {
    for code in [0x80, 0xC1, 0xC9, 0xCB, 0xCC, 0xD4, 0xFF] {
        let mut script = Script::new((0..5).map(|_| cc(code)));
        let err = dispatch(&mut script, &request(), &policy(5)).unwrap_err();
        assert_eq!(err.completion_code(), Some(code));
        assert_eq!(script.attempts, 1, "code {code:#04x}");
    }
}

#[test]
fn transport_errors_propagate_immediately() {
    let mut script = Script::new([
        Err(Error::Timeout),
        cc(0x00),
    ]);
    assert!(matches!(
        dispatch(&mut script, &request(), &policy(5)),
        Err(Error::Timeout)
    ));
    assert_eq!(script.attempts, 1);

    let mut script = Script::new([Err(Error::SequenceMismatch {
        expected: 3,
        actual: 2,
    })]);
    assert!(dispatch(&mut script, &request(), &policy(5))
        .unwrap_err()
        .is_transport());
}

#[test]
fn reservation_cancelled_is_left_to_the_caller() {
    let mut script = Script::new([cc(0xC5), cc(0x00)]);
    assert!(matches!(
        dispatch(&mut script, &request(), &policy(5)),
        Err(Error::ReservationCancelled)
    ));
    assert_eq!(script.attempts, 1);
}

#[test]
fn zero_attempts_still_tries_once() {
    let mut script = Script::new([cc(0xC0)]);
    let err = dispatch(&mut script, &request(), &policy(0)).unwrap_err();
    assert!(matches!(err, Error::Exhausted { attempts: 1, .. }));
}

#[test]
fn fitted_policy_bounds_attempts() {
    let fitted = RetryPolicy::new(5, Duration::from_millis(10)).fit_within(Duration::from_millis(25));
    assert_eq!(fitted.max_attempts, 3);

    let mut script = Script::new((0..10).map(|_| cc(0xC0)));
    let _ = dispatch(&mut script, &request(), &fitted);
    assert_eq!(script.attempts, 3);
}

#[test]
fn typed_call_parses_after_retry() {
    let mut script = Script::new([
        cc(0xC0),
        Ok(RawResponse {
            cmd: 0x01,
            completion_code: 0x00,
            data: vec![0x20, 0x01, 0x02, 0x43, 0x02, 0x00, 0x57, 0x01, 0x00, 0x00, 0x01],
        }),
    ]);
    let id = call(&mut script, &GetDeviceId, &policy(2)).expect("call");
    assert_eq!(id.manufacturer_id, 0x000157);
    assert_eq!(script.attempts, 2);
}
