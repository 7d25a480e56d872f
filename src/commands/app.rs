use crate::commands::{Command, ok_data};
use crate::error::{Error, Result};
use crate::schema::{Field, Layout};
use crate::types::{ChannelAuthCapabilities, DeviceId, PrivilegeLevel, RawResponse, netfn};

const DEVICE_ID: Layout = Layout::new(
    "get device id response",
    &[
        Field::byte("device_id", 0),
        Field::bits("device_revision", 1, 0, 4),
        // Bit 7 is "device available", not part of the revision.
        Field::bits("firmware_major", 2, 0, 7),
        Field::byte("firmware_minor", 3),
        Field::byte("ipmi_version", 4),
        Field::byte("additional_device_support", 5),
        Field::le("manufacturer_id", 6, 3),
        Field::le("product_id", 9, 2),
    ],
);

// Optional trailer of Get Device ID.
const DEVICE_ID_AUX: Layout = Layout::new(
    "get device id aux revision",
    &[Field::le("aux_firmware_revision", 11, 4)],
);

const CHANNEL_AUTH_CAPS: Layout = Layout::new(
    "get channel authentication capabilities response",
    &[
        Field::bits("channel_number", 0, 0, 4),
        Field::bits("enabled_auth_types", 1, 0, 6),
        Field::bits("v20_data_available", 1, 7, 1),
        Field::bits("anonymous_login_enabled", 2, 0, 1),
        Field::bits("null_usernames", 2, 1, 1),
        Field::bits("non_null_usernames", 2, 2, 1),
        Field::bits("user_level_auth_disabled", 2, 3, 1),
        Field::bits("per_message_auth_disabled", 2, 4, 1),
        Field::bits("kg_nonzero", 2, 5, 1),
        Field::bits("supports_ipmi_v1_5", 3, 0, 1),
        Field::bits("supports_ipmi_v2_0", 3, 1, 1),
        Field::le("oem_id", 4, 3),
        Field::byte("oem_aux_data", 7),
    ],
);

/// Enabled auth type bit for OEM proprietary authentication.
const AUTH_TYPE_OEM: u8 = 0x20;

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_device_id(ok_data(Self::NETFN, &response)?)
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetChannelAuthCapabilities {
    /// Channel number (low nibble); 0x0E means "this channel".
    pub channel: u8,
    /// Privilege to query.
    pub privilege: PrivilegeLevel,
    /// Request that IPMI v2.0 data be included when available.
    pub request_v2_data: bool,
}

impl GetChannelAuthCapabilities {
    /// Create a query that requests IPMI v2.0 data (when supported).
    pub fn new(channel: u8, privilege: PrivilegeLevel) -> Self {
        Self {
            channel,
            privilege,
            request_v2_data: true,
        }
    }

    /// Return a variant that does not request IPMI v2.0 data.
    pub fn without_v2_data(self) -> Self {
        Self {
            request_v2_data: false,
            ..self
        }
    }
}

impl Command for GetChannelAuthCapabilities {
    type Output = ChannelAuthCapabilities;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        let channel = if self.request_v2_data {
            self.channel | 0x80
        } else {
            self.channel & 0x7F
        };
        vec![channel, self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_channel_auth_capabilities(ok_data(Self::NETFN, &response)?)
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
///
/// Returns the privilege level now in effect.
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilegeLevel {
    /// Level to switch the session to.
    pub privilege: PrivilegeLevel,
}

impl Command for SetSessionPrivilegeLevel {
    type Output = PrivilegeLevel;
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8()]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(Self::NETFN, &response)?;
        let level = *data
            .first()
            .ok_or(Error::Protocol("Set Session Privilege Level response too short"))?;
        PrivilegeLevel::from_u8(level)
            .ok_or(Error::Protocol("Set Session Privilege Level returned unknown level"))
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Managed system session id to close.
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = netfn::APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(Self::NETFN, &response)?;
        Ok(())
    }
}

pub(crate) fn parse_device_id(data: &[u8]) -> Result<DeviceId> {
    let f = DEVICE_ID.decode(data)?;
    let aux_firmware_revision = match DEVICE_ID_AUX.decode(data) {
        Ok(aux) => aux.u32("aux_firmware_revision")?.to_le_bytes(),
        Err(_) => [0; 4],
    };

    Ok(DeviceId {
        device_id: f.u8("device_id")?,
        device_revision: f.u8("device_revision")?,
        firmware_major: f.u8("firmware_major")?,
        firmware_minor: f.u8("firmware_minor")?,
        ipmi_version: f.u8("ipmi_version")?,
        additional_device_support: f.u8("additional_device_support")?,
        manufacturer_id: f.u32("manufacturer_id")?,
        product_id: f.u16("product_id")?,
        aux_firmware_revision,
    })
}

pub(crate) fn parse_channel_auth_capabilities(data: &[u8]) -> Result<ChannelAuthCapabilities> {
    let f = CHANNEL_AUTH_CAPS.decode(data)?;
    let flag = |name| f.u8(name).map(|v| v != 0);

    let enabled_auth_types = f.u8("enabled_auth_types")?;
    let (oem_id, oem_aux_data) = if enabled_auth_types & AUTH_TYPE_OEM != 0 {
        (Some(f.u32("oem_id")?), Some(f.u8("oem_aux_data")?))
    } else {
        (None, None)
    };

    Ok(ChannelAuthCapabilities {
        channel_number: f.u8("channel_number")?,
        v20_data_available: flag("v20_data_available")?,
        enabled_auth_types,
        per_message_auth_disabled: flag("per_message_auth_disabled")?,
        user_level_auth_disabled: flag("user_level_auth_disabled")?,
        non_null_usernames: flag("non_null_usernames")?,
        null_usernames: flag("null_usernames")?,
        anonymous_login_enabled: flag("anonymous_login_enabled")?,
        kg_nonzero: flag("kg_nonzero")?,
        supports_ipmi_v1_5: flag("supports_ipmi_v1_5")?,
        supports_ipmi_v2_0: flag("supports_ipmi_v2_0")?,
        oem_id,
        oem_aux_data,
    })
}
