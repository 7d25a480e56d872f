use crate::commands::{Command, ok_data};
use crate::error::Result;
use crate::schema::{Field, Layout};
use crate::types::{RawResponse, TimerUse, WatchdogTimer, netfn};

const WATCHDOG_TIMER: Layout = Layout::new(
    "get watchdog timer response",
    &[
        Field::bits("timer_use", 0, 0, 3),
        Field::bits("running", 0, 6, 1),
        Field::bits("log_disabled", 0, 7, 1),
        Field::bits("timeout_action", 1, 0, 3),
        Field::bits("pre_timeout_interrupt", 1, 4, 3),
        Field::byte("pre_timeout_interval", 2),
        Field::byte("expiration_flags", 3),
        Field::le("initial_countdown", 4, 2),
        Field::le("present_countdown", 6, 2),
    ],
);

/// `Reset Watchdog Timer` (App NetFn, cmd 0x22).
///
/// Completion code 80h means the timer was never set up.
#[derive(Debug, Clone, Copy)]
pub struct ResetWatchdogTimer;

impl Command for ResetWatchdogTimer {
    type Output = ();
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x22;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(Self::NETFN, &response)?;
        Ok(())
    }
}

/// `Get Watchdog Timer` (App NetFn, cmd 0x25).
#[derive(Debug, Clone, Copy)]
pub struct GetWatchdogTimer;

impl Command for GetWatchdogTimer {
    type Output = WatchdogTimer;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x25;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let f = WATCHDOG_TIMER.decode(ok_data(Self::NETFN, &response)?)?;
        Ok(WatchdogTimer {
            timer_use: TimerUse::from_bits(f.u8("timer_use")?),
            running: f.u8("running")? != 0,
            log_disabled: f.u8("log_disabled")? != 0,
            timeout_action: f.u8("timeout_action")?,
            pre_timeout_interrupt: f.u8("pre_timeout_interrupt")?,
            pre_timeout_interval: f.u8("pre_timeout_interval")?,
            initial_countdown: f.u16("initial_countdown")?,
            present_countdown: f.u16("present_countdown")?,
        })
    }
}
