//! Per-transport open parameters.
//!
//! Builders only record values; [`DeviceConfig::validate`] (called by
//! [`crate::Device::open`]) rejects bad combinations with
//! [`Error::ConfigInvalid`].

use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::transport::lan::rakp::{
    AUTH_RAKP_HMAC_SHA1, Algorithms, CONFIDENTIALITY_AES_CBC_128, INTEGRITY_HMAC_SHA1_96,
};
use crate::types::{Mode, PrivilegeLevel};

/// Well-known KCS system interface address probed when none is configured.
pub const KCS_DEFAULT_ADDRESS: u16 = 0x0CA2;
/// Default RMCP port.
pub const RMCP_PORT: u16 = 623;

/// Builder for the KCS (Keyboard Controller Style) system interface.
#[derive(Debug, Clone)]
pub struct KcsConfig {
    pub(crate) base_address: Option<u16>,
    pub(crate) register_spacing: u8,
    pub(crate) port_path: PathBuf,
    pub(crate) poll_interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) mode: Mode,
}

impl KcsConfig {
    /// Autoprobe the default address with 1-byte register spacing.
    pub fn new() -> Self {
        Self {
            base_address: None,
            register_spacing: 1,
            port_path: PathBuf::from("/dev/port"),
            poll_interval: Duration::from_micros(10),
            timeout: Duration::from_secs(5),
            mode: Mode::Blocking,
        }
    }

    /// Use an explicit base I/O address instead of probing.
    pub fn base_address(mut self, address: u16) -> Self {
        self.base_address = Some(address);
        self
    }

    /// Distance between the data and status registers (1, 2, 4, 8 or 16).
    pub fn register_spacing(mut self, spacing: u8) -> Self {
        self.register_spacing = spacing;
        self
    }

    /// Port I/O device (default `/dev/port`).
    pub fn port_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.port_path = path.into();
        self
    }

    /// Delay between status register reads.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long each handshake phase may take.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocking or non-blocking execution.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub(crate) fn address(&self) -> u16 {
        self.base_address.unwrap_or(KCS_DEFAULT_ADDRESS)
    }

    fn validate(&self) -> Result<()> {
        if self.base_address == Some(0) {
            return Err(Error::ConfigInvalid("KCS base address must be non-zero"));
        }
        if !matches!(self.register_spacing, 1 | 2 | 4 | 8 | 16) {
            return Err(Error::ConfigInvalid(
                "KCS register spacing must be 1, 2, 4, 8 or 16",
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::ConfigInvalid("KCS timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for KcsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the SSIF (SMBus System Interface).
#[derive(Debug, Clone)]
pub struct SsifConfig {
    pub(crate) device_path: PathBuf,
    pub(crate) address: u8,
    pub(crate) poll_interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) mode: Mode,
}

impl SsifConfig {
    /// `/dev/i2c-0`, slave address 0x10.
    pub fn new() -> Self {
        Self {
            device_path: PathBuf::from("/dev/i2c-0"),
            address: 0x10,
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            mode: Mode::Blocking,
        }
    }

    /// i2c-dev character device.
    pub fn device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// 7-bit SMBus slave address of the BMC.
    pub fn address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Delay between response reads while the BMC is not ready.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long to wait for a response.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocking or non-blocking execution.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0x08..=0x77).contains(&self.address) {
            return Err(Error::ConfigInvalid(
                "SSIF slave address must be a 7-bit address in 0x08..=0x77",
            ));
        }
        if self.device_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("SSIF device path is empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::ConfigInvalid("SSIF timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for SsifConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// RMCP+ cipher suites this crate can negotiate.
///
/// All use RAKP-HMAC-SHA1 authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// Suite 1: no integrity, no confidentiality.
    Suite1,
    /// Suite 2: HMAC-SHA1-96 integrity.
    Suite2,
    /// Suite 3: HMAC-SHA1-96 integrity and AES-CBC-128 confidentiality.
    Suite3,
}

impl CipherSuite {
    /// Cipher suite id as listed in IPMI v2.0 table 22-20.
    pub fn id(self) -> u8 {
        match self {
            Self::Suite1 => 1,
            Self::Suite2 => 2,
            Self::Suite3 => 3,
        }
    }

    /// Look up a suite by id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Suite1),
            2 => Some(Self::Suite2),
            3 => Some(Self::Suite3),
            _ => None,
        }
    }

    pub(crate) fn algorithms(self) -> Algorithms {
        let (integrity, confidentiality) = match self {
            Self::Suite1 => (0x00, 0x00),
            Self::Suite2 => (INTEGRITY_HMAC_SHA1_96, 0x00),
            Self::Suite3 => (INTEGRITY_HMAC_SHA1_96, CONFIDENTIALITY_AES_CBC_128),
        };
        Algorithms {
            auth: AUTH_RAKP_HMAC_SHA1,
            integrity,
            confidentiality,
        }
    }
}

/// Builder for an RMCP+ (IPMI v2.0 LAN) session.
#[derive(Debug, Clone)]
pub struct LanConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) username: Vec<u8>,
    pub(crate) password: SecretBytes,
    pub(crate) bmc_key: Option<SecretBytes>,
    pub(crate) privilege: PrivilegeLevel,
    pub(crate) timeout: Duration,
    pub(crate) attempts: u32,
    pub(crate) cipher_suites: Vec<CipherSuite>,
    pub(crate) channel: u8,
    pub(crate) mode: Mode,
}

impl LanConfig {
    /// Target `host` on port 623 with an anonymous (empty) user.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: RMCP_PORT,
            username: Vec::new(),
            password: SecretBytes::default(),
            bmc_key: None,
            privilege: PrivilegeLevel::Administrator,
            timeout: Duration::from_secs(1),
            attempts: 3,
            cipher_suites: vec![CipherSuite::Suite3, CipherSuite::Suite2, CipherSuite::Suite1],
            channel: 0x0E,
            mode: Mode::Blocking,
        }
    }

    /// UDP port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username (bytes).
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the username (UTF-8 string).
    pub fn username(self, username: impl AsRef<str>) -> Self {
        self.username_bytes(username.as_ref().as_bytes())
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = SecretBytes::new(password.into());
        self
    }

    /// Set the password (UTF-8 string).
    pub fn password(self, password: impl AsRef<str>) -> Self {
        self.password_bytes(password.as_ref().as_bytes())
    }

    /// Set the BMC key (`Kg`) for two-key logins.
    ///
    /// Without it the password key doubles as `Kg`.
    pub fn bmc_key_bytes(mut self, kg: impl Into<Vec<u8>>) -> Self {
        self.bmc_key = Some(SecretBytes::new(kg.into()));
        self
    }

    /// Requested session privilege level.
    pub fn privilege(mut self, level: PrivilegeLevel) -> Self {
        self.privilege = level;
        self
    }

    /// UDP read timeout per attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send attempts per request (including the first).
    pub fn retries(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Cipher suites to try, in order.
    pub fn cipher_suites(mut self, suites: impl Into<Vec<CipherSuite>>) -> Self {
        self.cipher_suites = suites.into();
        self
    }

    /// Channel probed with Get Channel Authentication Capabilities.
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Blocking or non-blocking execution once the session is up.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::ConfigInvalid("LAN target host is empty"));
        }
        if self.port == 0 {
            return Err(Error::ConfigInvalid("LAN port must be non-zero"));
        }
        if self.username.len() > 16 {
            return Err(Error::ConfigInvalid("username longer than 16 bytes"));
        }
        if self.password.len() > 20 {
            return Err(Error::ConfigInvalid("password longer than 20 bytes"));
        }
        if self.bmc_key.as_ref().is_some_and(|kg| kg.len() > 20) {
            return Err(Error::ConfigInvalid("BMC key longer than 20 bytes"));
        }
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigInvalid("no cipher suites configured"));
        }
        if self.channel > 0x0F {
            return Err(Error::ConfigInvalid("channel number must fit in 4 bits"));
        }
        if self.timeout.is_zero() {
            return Err(Error::ConfigInvalid("LAN timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Parameters for [`crate::Device::open`].
#[derive(Debug, Clone)]
pub enum DeviceConfig {
    /// KCS system interface.
    Kcs(KcsConfig),
    /// SSIF system interface.
    Ssif(SsifConfig),
    /// RMCP+ LAN session.
    Lan(LanConfig),
}

impl DeviceConfig {
    /// Check the parameters without touching any device.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Kcs(c) => c.validate(),
            Self::Ssif(c) => c.validate(),
            Self::Lan(c) => c.validate(),
        }
    }
}

impl From<KcsConfig> for DeviceConfig {
    fn from(config: KcsConfig) -> Self {
        Self::Kcs(config)
    }
}

impl From<SsifConfig> for DeviceConfig {
    fn from(config: SsifConfig) -> Self {
        Self::Ssif(config)
    }
}

impl From<LanConfig> for DeviceConfig {
    fn from(config: LanConfig) -> Self {
        Self::Lan(config)
    }
}
