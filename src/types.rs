use core::fmt;

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x01 => Some(Self::Callback),
            0x02 => Some(Self::User),
            0x03 => Some(Self::Operator),
            0x04 => Some(Self::Administrator),
            0x05 => Some(Self::Oem),
            _ => None,
        }
    }

    /// Levels tried, in order, when the BMC refuses the requested one.
    pub(crate) fn downgrade_order(self) -> &'static [PrivilegeLevel] {
        match self {
            Self::Administrator => &[Self::Administrator, Self::Operator, Self::User],
            Self::Operator => &[Self::Operator, Self::User],
            Self::User => &[Self::User],
            Self::Callback => &[Self::Callback],
            Self::Oem => &[Self::Oem],
        }
    }
}

/// Network function codes (request values; responses are `netfn | 1`).
pub mod netfn {
    /// Chassis.
    pub const CHASSIS: u8 = 0x00;
    /// Sensor/Event.
    pub const SENSOR_EVENT: u8 = 0x04;
    /// Application.
    pub const APP: u8 = 0x06;
    /// Firmware.
    pub const FIRMWARE: u8 = 0x08;
    /// Storage (SEL, SDR, FRU).
    pub const STORAGE: u8 = 0x0A;
    /// Transport.
    pub const TRANSPORT: u8 = 0x0C;
    /// OEM/Group.
    pub const OEM_GROUP: u8 = 0x2C;

    /// Whether `netfn` fits the 6-bit field.
    pub const fn is_valid(netfn: u8) -> bool {
        netfn <= 0x3F
    }
}

/// Target logical unit number (2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Lun {
    /// BMC commands and event request messages.
    #[default]
    Bmc = 0x00,
    /// OEM LUN 1.
    Oem1 = 0x01,
    /// SMS message LUN.
    Sms = 0x02,
    /// OEM LUN 2.
    Oem2 = 0x03,
}

impl Lun {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0x00 => Self::Bmc,
            0x01 => Self::Oem1,
            0x02 => Self::Sms,
            _ => Self::Oem2,
        }
    }
}

/// One command envelope: target, opcode and request bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    /// Target LUN.
    pub lun: Lun,
    /// Network function (6 bits, request value).
    pub netfn: u8,
    /// Command opcode.
    pub cmd: u8,
    /// Request data bytes (excluding netfn/cmd framing).
    pub data: Vec<u8>,
}

impl Request {
    /// A request to LUN 0.
    pub fn new(netfn: u8, cmd: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            lun: Lun::Bmc,
            netfn,
            cmd,
            data: data.into(),
        }
    }

    /// Change the target LUN.
    pub fn with_lun(mut self, lun: Lun) -> Self {
        self.lun = lun;
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if !netfn::is_valid(self.netfn) {
            return Err(crate::Error::InvalidArgument("netfn must be 6-bit"));
        }
        if self.netfn & 0x01 != 0 {
            return Err(crate::Error::InvalidArgument(
                "netfn must be a request (even) value",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("lun", &self.lun)
            .field("netfn", &format_args!("{:#04x}", self.netfn))
            .field("cmd", &format_args!("{:#04x}", self.cmd))
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A raw IPMI response.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Command opcode echoed by the BMC.
    pub cmd: u8,
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl RawResponse {
    /// Whether the completion code is zero.
    pub fn is_success(&self) -> bool {
        self.completion_code == crate::completion::OK
    }

    /// Wire form used by `Device::execute_raw`: `[cmd, completion_code, data..]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.push(self.cmd);
        out.push(self.completion_code);
        out.extend_from_slice(&self.data);
        out
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("cmd", &format_args!("{:#04x}", self.cmd))
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// The medium a [`crate::Device`] talks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Keyboard Controller Style system interface.
    Kcs,
    /// SMBus System Interface.
    Ssif,
    /// RMCP+ over UDP.
    Lan,
}

impl TransportKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Kcs => "kcs",
            Self::Ssif => "ssif",
            Self::Lan => "lan",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking behaviour of a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// `execute` waits for the response.
    #[default]
    Blocking,
    /// `execute` returns [`crate::Error::WouldBlock`] instead of waiting.
    NonBlocking,
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x02 for 2.0).
    pub ipmi_version: u8,
    /// Additional device support bitmask (bit 2: SEL device).
    pub additional_device_support: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
    /// Auxiliary firmware revision information (4 bytes).
    pub aux_firmware_revision: [u8; 4],
}

impl DeviceId {
    /// Whether the BMC advertises a SEL device.
    pub fn supports_sel(&self) -> bool {
        self.additional_device_support & 0x04 != 0
    }
}

/// Parsed response for `Get Channel Authentication Capabilities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuthCapabilities {
    /// Channel number.
    pub channel_number: u8,
    /// Indicates IPMI v2.0 data is available in the response.
    pub v20_data_available: bool,
    /// IPMI v1.5 enabled authentication types (bitmask).
    pub enabled_auth_types: u8,
    /// Per-message authentication is disabled when true.
    pub per_message_auth_disabled: bool,
    /// User-level authentication is disabled when true.
    pub user_level_auth_disabled: bool,
    /// One or more non-null user names exist.
    pub non_null_usernames: bool,
    /// One or more null user names with non-null passwords exist.
    pub null_usernames: bool,
    /// Anonymous login (null user/null password) is enabled.
    pub anonymous_login_enabled: bool,
    /// Non-zero Kg key is configured (two-key login).
    pub kg_nonzero: bool,
    /// Channel supports IPMI v1.5.
    pub supports_ipmi_v1_5: bool,
    /// Channel supports IPMI v2.0.
    pub supports_ipmi_v2_0: bool,
    /// OEM IANA enterprise number for OEM auth types, if present.
    pub oem_id: Option<u32>,
    /// OEM auxiliary data, if present.
    pub oem_aux_data: Option<u8>,
}

/// Timer use field of the BMC watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerUse {
    /// BIOS FRB2.
    BiosFrb2,
    /// BIOS/POST.
    BiosPost,
    /// OS load.
    OsLoad,
    /// SMS/OS.
    SmsOs,
    /// OEM.
    Oem,
    /// Reserved value.
    Reserved(u8),
}

impl TimerUse {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0x01 => Self::BiosFrb2,
            0x02 => Self::BiosPost,
            0x03 => Self::OsLoad,
            0x04 => Self::SmsOs,
            0x05 => Self::Oem,
            other => Self::Reserved(other),
        }
    }
}

/// Parsed response for `Get Watchdog Timer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogTimer {
    /// What the timer is used for.
    pub timer_use: TimerUse,
    /// Timer is running.
    pub running: bool,
    /// Don't log a SEL event on expiration.
    pub log_disabled: bool,
    /// Timeout action (bits 2:0 of the actions byte).
    pub timeout_action: u8,
    /// Pre-timeout interrupt (bits 6:4 of the actions byte).
    pub pre_timeout_interrupt: u8,
    /// Pre-timeout interval in seconds.
    pub pre_timeout_interval: u8,
    /// Initial countdown, in 100 ms units.
    pub initial_countdown: u16,
    /// Present countdown, in 100 ms units.
    pub present_countdown: u16,
}
