#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A blocking IPMI client for talking to a BMC over its local system
//! interfaces or the network.
//!
//! The crate implements:
//! - KCS and SSIF system interfaces, and RMCP+ LAN sessions (RAKP, HMAC-SHA1-96, AES-CBC-128)
//! - Completion-code classification with bounded retry ([`dispatch`])
//! - Reservation-protected SEL retrieval with an in-memory cursor ([`sel`])
//!
//! Every medium sits behind one [`Device`]; everything above it is generic
//! over the [`Exchange`] trait.
//!
//! ```no_run
//! use bmc_ipmi::{Device, LanConfig, RetryPolicy, commands::GetDeviceId};
//!
//! # fn main() -> bmc_ipmi::Result<()> {
//! let mut device = Device::open(
//!     LanConfig::new("10.0.0.10").username("admin").password("secret"),
//! )?;
//! let id = device.call(&GetDeviceId, &RetryPolicy::default())?;
//! println!("firmware {}.{:02x}", id.firmware_major, id.firmware_minor);
//! device.close()
//! # }
//! ```

pub mod commands;
pub mod completion;
mod config;
mod crypto;
mod debug;
mod device;
pub mod dispatch;
mod error;
mod observe;
pub mod schema;
pub mod sel;
mod transport;
mod types;

pub use crate::completion::CompletionCodeTable;
pub use crate::config::{
    CipherSuite, DeviceConfig, KCS_DEFAULT_ADDRESS, KcsConfig, LanConfig, RMCP_PORT, SsifConfig,
};
pub use crate::device::{Device, Exchange};
pub use crate::dispatch::{RetryPolicy, Status};
pub use crate::error::{CallbackError, Error, Result};
pub use crate::sel::{SelConfig, SelEngine, SelRecord};
pub use crate::transport::lan::SessionState;
pub use crate::types::{
    ChannelAuthCapabilities, DeviceId, Lun, Mode, PrivilegeLevel, RawResponse, Request,
    TimerUse, TransportKind, WatchdogTimer, netfn,
};
