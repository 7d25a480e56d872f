//! RMCP+ Open Session and RAKP 1-4 payloads (IPMI v2.0 section 13.17-13.23).

use crate::crypto::{hmac_sha1, hmac_sha1_96};
use crate::error::{Error, Result};
use crate::types::PrivilegeLevel;

/// Algorithm numbers of one cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Algorithms {
    pub auth: u8,
    pub integrity: u8,
    pub confidentiality: u8,
}

pub(crate) const AUTH_RAKP_HMAC_SHA1: u8 = 0x01;
pub(crate) const INTEGRITY_HMAC_SHA1_96: u8 = 0x01;
pub(crate) const CONFIDENTIALITY_AES_CBC_128: u8 = 0x01;

/// RMCP+ status codes (table 13-15) that matter to negotiation.
pub(crate) mod status {
    pub const OK: u8 = 0x00;
    pub const INVALID_AUTH_ALGORITHM: u8 = 0x04;
    pub const INVALID_INTEGRITY_ALGORITHM: u8 = 0x05;
    pub const NO_MATCHING_AUTH_PAYLOAD: u8 = 0x06;
    pub const NO_MATCHING_INTEGRITY_PAYLOAD: u8 = 0x07;
    pub const INVALID_ROLE: u8 = 0x09;
    pub const UNAUTHORIZED_ROLE: u8 = 0x0A;
    pub const INSUFFICIENT_RESOURCES_FOR_ROLE: u8 = 0x0B;
    pub const INVALID_NAME_LENGTH: u8 = 0x0C;
    pub const UNAUTHORIZED_NAME: u8 = 0x0D;
    pub const UNAUTHORIZED_GUID: u8 = 0x0E;
    pub const INVALID_INTEGRITY_CHECK_VALUE: u8 = 0x0F;
    pub const INVALID_CONFIDENTIALITY_ALGORITHM: u8 = 0x10;
    pub const NO_CIPHER_SUITE_MATCH: u8 = 0x11;
    pub const ILLEGAL_PARAMETER: u8 = 0x12;
}

/// How a non-zero RMCP+ status steers negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    /// Try the next cipher suite.
    CipherSuite,
    /// Try the next (lower) privilege level.
    Privilege,
    /// Credentials refused.
    Credentials,
    /// Anything else.
    Other,
}

pub(crate) fn classify_status(code: u8) -> Rejection {
    match code {
        status::INVALID_AUTH_ALGORITHM
        | status::INVALID_INTEGRITY_ALGORITHM
        | status::NO_MATCHING_AUTH_PAYLOAD
        | status::NO_MATCHING_INTEGRITY_PAYLOAD
        | status::INVALID_CONFIDENTIALITY_ALGORITHM
        | status::NO_CIPHER_SUITE_MATCH
        | status::ILLEGAL_PARAMETER => Rejection::CipherSuite,
        status::INVALID_ROLE
        | status::UNAUTHORIZED_ROLE
        | status::INSUFFICIENT_RESOURCES_FOR_ROLE => Rejection::Privilege,
        status::INVALID_NAME_LENGTH
        | status::UNAUTHORIZED_NAME
        | status::UNAUTHORIZED_GUID
        | status::INVALID_INTEGRITY_CHECK_VALUE => Rejection::Credentials,
        _ => Rejection::Other,
    }
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

/// Role byte for Open Session: 0 asks for the highest level the user may have.
fn open_session_role(privilege: PrivilegeLevel) -> u8 {
    match privilege {
        PrivilegeLevel::Administrator => 0x00,
        other => other.as_u8(),
    }
}

fn algorithm_record(kind: u8, algorithm: u8) -> [u8; 8] {
    [kind, 0x00, 0x00, 0x08, algorithm & 0x3F, 0x00, 0x00, 0x00]
}

/// Open Session Request (table 13-9).
pub(crate) fn open_session_request(
    tag: u8,
    privilege: PrivilegeLevel,
    console_session_id: u32,
    suite: Algorithms,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);
    p.extend_from_slice(&[tag, open_session_role(privilege), 0x00, 0x00]);
    p.extend_from_slice(&console_session_id.to_le_bytes());
    p.extend_from_slice(&algorithm_record(0x00, suite.auth));
    p.extend_from_slice(&algorithm_record(0x01, suite.integrity));
    p.extend_from_slice(&algorithm_record(0x02, suite.confidentiality));
    p
}

#[derive(Debug, Clone)]
pub(crate) struct OpenSessionResponse {
    pub tag: u8,
    pub status: u8,
    pub console_session_id: u32,
    pub bmc_session_id: u32,
    pub suite: Algorithms,
}

pub(crate) fn parse_open_session_response(payload: &[u8]) -> Result<OpenSessionResponse> {
    if payload.len() < 8 {
        return Err(Error::Protocol("open session response too short"));
    }
    let mut out = OpenSessionResponse {
        tag: payload[0],
        status: payload[1],
        console_session_id: le_u32(payload, 4),
        bmc_session_id: 0,
        suite: Algorithms {
            auth: 0,
            integrity: 0,
            confidentiality: 0,
        },
    };
    if out.status != status::OK {
        return Ok(out);
    }
    if payload.len() < 36 {
        return Err(Error::Protocol("open session response too short"));
    }
    out.bmc_session_id = le_u32(payload, 8);
    out.suite = Algorithms {
        auth: payload[16] & 0x3F,
        integrity: payload[24] & 0x3F,
        confidentiality: payload[32] & 0x3F,
    };
    Ok(out)
}

/// Inputs shared by the RAKP 1-4 computations.
#[derive(Debug, Clone)]
pub(crate) struct Exchange<'a> {
    pub console_session_id: u32,
    pub bmc_session_id: u32,
    pub console_random: [u8; 16],
    pub privilege: PrivilegeLevel,
    pub username: &'a [u8],
}

impl Exchange<'_> {
    fn role(&self) -> u8 {
        // Bit 4 clear: name/privilege lookup.
        self.privilege.as_u8() & 0x0F
    }

    fn name_len(&self) -> u8 {
        self.username.len() as u8
    }

    /// RAKP Message 1 (table 13-11).
    pub(crate) fn rakp1(&self, tag: u8) -> Result<Vec<u8>> {
        if self.username.len() > 16 {
            return Err(Error::InvalidArgument("username too long (max 16 bytes)"));
        }
        let mut p = Vec::with_capacity(28 + self.username.len());
        p.extend_from_slice(&[tag, 0x00, 0x00, 0x00]);
        p.extend_from_slice(&self.bmc_session_id.to_le_bytes());
        p.extend_from_slice(&self.console_random);
        p.extend_from_slice(&[self.role(), 0x00, 0x00, self.name_len()]);
        p.extend_from_slice(self.username);
        Ok(p)
    }

    /// Key exchange code the BMC puts in RAKP 2.
    pub(crate) fn rakp2_auth_code(
        &self,
        user_key: &[u8; 20],
        bmc_random: &[u8; 16],
        bmc_guid: &[u8; 16],
    ) -> Result<[u8; 20]> {
        hmac_sha1(
            user_key,
            &[
                &self.console_session_id.to_le_bytes(),
                &self.bmc_session_id.to_le_bytes(),
                &self.console_random,
                bmc_random,
                bmc_guid,
                &[self.role(), self.name_len()],
                self.username,
            ],
        )
    }

    /// Session Integrity Key: HMAC(Kg, Rm | Rc | role | ulen | uname).
    pub(crate) fn sik(&self, kg: &[u8; 20], bmc_random: &[u8; 16]) -> Result<[u8; 20]> {
        hmac_sha1(
            kg,
            &[
                &self.console_random,
                bmc_random,
                &[self.role(), self.name_len()],
                self.username,
            ],
        )
    }

    /// Key exchange code the console sends in RAKP 3.
    pub(crate) fn rakp3_auth_code(
        &self,
        user_key: &[u8; 20],
        bmc_random: &[u8; 16],
    ) -> Result<[u8; 20]> {
        hmac_sha1(
            user_key,
            &[
                bmc_random,
                &self.console_session_id.to_le_bytes(),
                &[self.role(), self.name_len()],
                self.username,
            ],
        )
    }

    /// Integrity check value the BMC puts in RAKP 4.
    pub(crate) fn rakp4_icv(&self, sik: &[u8; 20], bmc_guid: &[u8; 16]) -> Result<[u8; 12]> {
        hmac_sha1_96(
            sik,
            &[
                &self.console_random,
                &self.bmc_session_id.to_le_bytes(),
                bmc_guid,
            ],
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Rakp2 {
    pub tag: u8,
    pub status: u8,
    pub console_session_id: u32,
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    pub auth_code: [u8; 20],
}

pub(crate) fn parse_rakp2(payload: &[u8]) -> Result<Rakp2> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 2 too short"));
    }
    let mut out = Rakp2 {
        tag: payload[0],
        status: payload[1],
        console_session_id: le_u32(payload, 4),
        bmc_random: [0; 16],
        bmc_guid: [0; 16],
        auth_code: [0; 20],
    };
    if out.status != status::OK {
        return Ok(out);
    }
    if payload.len() < 60 {
        return Err(Error::Protocol("RAKP message 2 too short"));
    }
    out.bmc_random = array(payload, 8);
    out.bmc_guid = array(payload, 24);
    out.auth_code = array(payload, 40);
    Ok(out)
}

/// RAKP Message 3 (table 13-13).
pub(crate) fn rakp3(tag: u8, bmc_session_id: u32, auth_code: &[u8; 20]) -> Vec<u8> {
    let mut p = Vec::with_capacity(28);
    p.extend_from_slice(&[tag, status::OK, 0x00, 0x00]);
    p.extend_from_slice(&bmc_session_id.to_le_bytes());
    p.extend_from_slice(auth_code);
    p
}

#[derive(Debug, Clone)]
pub(crate) struct Rakp4 {
    pub tag: u8,
    pub status: u8,
    pub console_session_id: u32,
    pub icv: [u8; 12],
}

pub(crate) fn parse_rakp4(payload: &[u8]) -> Result<Rakp4> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 4 too short"));
    }
    let mut out = Rakp4 {
        tag: payload[0],
        status: payload[1],
        console_session_id: le_u32(payload, 4),
        icv: [0; 12],
    };
    if out.status != status::OK {
        return Ok(out);
    }
    if payload.len() < 20 {
        return Err(Error::Protocol("RAKP message 4 too short"));
    }
    out.icv = array(payload, 8);
    Ok(out)
}

// BMC-side encoders for the scripted peer used in tests.
#[cfg(test)]
pub(crate) mod peer {
    use super::*;

    pub(crate) fn open_session_response(
        tag: u8,
        status_code: u8,
        console_session_id: u32,
        bmc_session_id: u32,
        suite: Algorithms,
    ) -> Vec<u8> {
        let mut p = vec![tag, status_code, 0x04, 0x00];
        p.extend_from_slice(&console_session_id.to_le_bytes());
        if status_code == status::OK {
            p.extend_from_slice(&bmc_session_id.to_le_bytes());
            p.extend_from_slice(&algorithm_record(0x00, suite.auth));
            p.extend_from_slice(&algorithm_record(0x01, suite.integrity));
            p.extend_from_slice(&algorithm_record(0x02, suite.confidentiality));
        }
        p
    }

    /// (tag, requested suite, role byte, console session id)
    pub(crate) fn parse_open_session_request(p: &[u8]) -> (u8, Algorithms, u8, u32) {
        let suite = Algorithms {
            auth: p[12] & 0x3F,
            integrity: p[20] & 0x3F,
            confidentiality: p[28] & 0x3F,
        };
        (p[0], suite, p[1], le_u32(p, 4))
    }

    /// (tag, console random, role, username)
    pub(crate) fn parse_rakp1(p: &[u8]) -> (u8, [u8; 16], u8, Vec<u8>) {
        let len = usize::from(p[27]);
        (p[0], array(p, 8), p[24], p[28..28 + len].to_vec())
    }

    pub(crate) fn rakp2(
        tag: u8,
        status_code: u8,
        console_session_id: u32,
        bmc_random: &[u8; 16],
        bmc_guid: &[u8; 16],
        auth_code: &[u8; 20],
    ) -> Vec<u8> {
        let mut p = vec![tag, status_code, 0x00, 0x00];
        p.extend_from_slice(&console_session_id.to_le_bytes());
        p.extend_from_slice(bmc_random);
        p.extend_from_slice(bmc_guid);
        p.extend_from_slice(auth_code);
        p
    }

    /// (tag, auth code)
    pub(crate) fn parse_rakp3(p: &[u8]) -> (u8, [u8; 20]) {
        (p[0], array(p, 8))
    }

    pub(crate) fn rakp4(tag: u8, status_code: u8, console_session_id: u32, icv: &[u8; 12]) -> Vec<u8> {
        let mut p = vec![tag, status_code, 0x00, 0x00];
        p.extend_from_slice(&console_session_id.to_le_bytes());
        p.extend_from_slice(icv);
        p
    }
}
