//! RMCP, IPMI v1.5 session-less and RMCP+ (IPMI v2.0) packet framing.

use rand::RngCore;

use crate::crypto::SessionKeys;
use crate::error::{Error, Result};

const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_CLASS_IPMI: u8 = 0x07;

const AUTH_TYPE_NONE: u8 = 0x00;
const AUTH_TYPE_RMCPPLUS: u8 = 0x06;

const NEXT_HEADER: u8 = 0x07;

const RMCP_HEADER_LEN: usize = 4;
const V15_HEADER_LEN: usize = RMCP_HEADER_LEN + 10;
const V20_HEADER_LEN: usize = RMCP_HEADER_LEN + 12;

/// Payload type numbers (IPMI v2.0 table 13-16).
pub(crate) mod payload_type {
    pub const IPMI: u8 = 0x00;
    pub const OPEN_SESSION_REQUEST: u8 = 0x10;
    pub const OPEN_SESSION_RESPONSE: u8 = 0x11;
    pub const RAKP_1: u8 = 0x12;
    pub const RAKP_2: u8 = 0x13;
    pub const RAKP_3: u8 = 0x14;
    pub const RAKP_4: u8 = 0x15;
}

fn push_rmcp_header(out: &mut Vec<u8>) {
    out.extend_from_slice(&[RMCP_VERSION, RMCP_RESERVED, RMCP_SEQ_NO_ACK, RMCP_CLASS_IPMI]);
}

fn check_rmcp_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < RMCP_HEADER_LEN {
        return Err(Error::Protocol("packet too short"));
    }
    if bytes[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }
    if bytes[3] & 0x1F != RMCP_CLASS_IPMI {
        return Err(Error::Protocol("unexpected RMCP class"));
    }
    Ok(())
}

/// Wrap a LAN message in an IPMI v1.5 session-less packet (auth type none).
pub(crate) fn encode_v15(message: &[u8]) -> Result<Vec<u8>> {
    let len = u8::try_from(message.len()).map_err(|_| Error::Protocol("message too large"))?;
    let mut out = Vec::with_capacity(V15_HEADER_LEN + message.len());
    push_rmcp_header(&mut out);
    out.push(AUTH_TYPE_NONE);
    out.extend_from_slice(&[0x00; 4]); // session sequence
    out.extend_from_slice(&[0x00; 4]); // session id
    out.push(len);
    out.extend_from_slice(message);
    Ok(out)
}

/// Extract the LAN message from an IPMI v1.5 session-less packet.
pub(crate) fn decode_v15(bytes: &[u8]) -> Result<&[u8]> {
    check_rmcp_header(bytes)?;
    if bytes.len() < V15_HEADER_LEN {
        return Err(Error::Protocol("IPMI v1.5 packet too short"));
    }
    if bytes[4] != AUTH_TYPE_NONE {
        return Err(Error::Protocol("unexpected authentication type in pre-session reply"));
    }
    let len = usize::from(bytes[V15_HEADER_LEN - 1]);
    bytes
        .get(V15_HEADER_LEN..V15_HEADER_LEN + len)
        .ok_or(Error::Protocol("truncated IPMI v1.5 message"))
}

/// RMCP+ session header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub payload_type: u8,
    pub authenticated: bool,
    pub encrypted: bool,
    pub session_id: u32,
    pub session_seq: u32,
}

impl Header {
    /// A header for pre-session payloads (Open Session, RAKP).
    pub(crate) fn unauthenticated(payload_type: u8) -> Self {
        Self {
            payload_type,
            authenticated: false,
            encrypted: false,
            session_id: 0,
            session_seq: 0,
        }
    }

    fn type_byte(&self) -> u8 {
        let mut b = self.payload_type & 0x3F;
        if self.authenticated {
            b |= 0x40;
        }
        if self.encrypted {
            b |= 0x80;
        }
        b
    }
}

/// A decoded RMCP+ packet with its payload verified and decrypted.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Build an RMCP+ packet, encrypting and signing as the header requests.
pub(crate) fn encode(header: &Header, payload: &[u8], keys: Option<&SessionKeys>) -> Result<Vec<u8>> {
    let sealed;
    let body = if header.encrypted {
        let keys = keys.ok_or(Error::Protocol("session keys required for encryption"))?;
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut iv);
        sealed = keys.encrypt_payload(payload, &iv)?;
        &sealed[..]
    } else {
        payload
    };

    let body_len = u16::try_from(body.len()).map_err(|_| Error::Protocol("payload too large"))?;
    let mut packet = Vec::with_capacity(V20_HEADER_LEN + body.len() + 32);
    push_rmcp_header(&mut packet);
    packet.push(AUTH_TYPE_RMCPPLUS);
    packet.push(header.type_byte());
    packet.extend_from_slice(&header.session_id.to_le_bytes());
    packet.extend_from_slice(&header.session_seq.to_le_bytes());
    packet.extend_from_slice(&body_len.to_le_bytes());
    packet.extend_from_slice(body);

    if header.authenticated {
        let keys = keys.ok_or(Error::Protocol("session keys required for integrity"))?;

        // Integrity pad aligns AuthType..NextHeader to a multiple of 4.
        let covered = packet.len() - RMCP_HEADER_LEN + 2;
        let pad_len = (4 - covered % 4) % 4;
        packet.extend(std::iter::repeat_n(0xFF, pad_len));
        packet.push(pad_len as u8);
        packet.push(NEXT_HEADER);

        let auth_code = keys.sign(&packet[RMCP_HEADER_LEN..])?;
        packet.extend_from_slice(&auth_code);
    }

    Ok(packet)
}

/// Parse an RMCP+ packet, verifying integrity and decrypting when flagged.
pub(crate) fn decode(bytes: &[u8], keys: Option<&SessionKeys>) -> Result<Packet> {
    check_rmcp_header(bytes)?;
    if bytes.len() < V20_HEADER_LEN {
        return Err(Error::Protocol("RMCP+ packet too short"));
    }
    if bytes[4] != AUTH_TYPE_RMCPPLUS {
        return Err(Error::Protocol("unsupported RMCP auth type"));
    }

    let type_byte = bytes[5];
    let header = Header {
        payload_type: type_byte & 0x3F,
        authenticated: type_byte & 0x40 != 0,
        encrypted: type_byte & 0x80 != 0,
        session_id: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        session_seq: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
    };
    if header.payload_type == 0x02 {
        return Err(Error::Unsupported("OEM explicit payload is not supported"));
    }

    let body_len = usize::from(u16::from_le_bytes([bytes[14], bytes[15]]));
    let body_end = V20_HEADER_LEN + body_len;
    let body = bytes
        .get(V20_HEADER_LEN..body_end)
        .ok_or(Error::Protocol("truncated payload"))?;

    if header.authenticated {
        let keys = keys.ok_or(Error::Protocol("unexpected authenticated packet"))?;
        verify_trailer(bytes, body_end, keys)?;
    }

    let payload = if header.encrypted {
        let keys = keys.ok_or(Error::Protocol("unexpected encrypted packet"))?;
        keys.decrypt_payload(body)?
    } else {
        body.to_vec()
    };

    Ok(Packet { header, payload })
}

fn verify_trailer(bytes: &[u8], body_end: usize, keys: &SessionKeys) -> Result<()> {
    let auth_len = SessionKeys::AUTH_CODE_LEN;
    if bytes.len() < body_end + 2 + auth_len {
        return Err(Error::Protocol("authenticated packet too short"));
    }
    let auth_start = bytes.len() - auth_len;
    if !keys.verify(&bytes[RMCP_HEADER_LEN..auth_start], &bytes[auth_start..])? {
        return Err(Error::Protocol("invalid packet integrity code"));
    }

    // [pad 0xFF ..][pad length][next header]
    if bytes[auth_start - 1] != NEXT_HEADER {
        return Err(Error::Protocol("unexpected next header"));
    }
    let pad = &bytes[body_end..auth_start - 2];
    if pad.len() != usize::from(bytes[auth_start - 2]) || pad.iter().any(|&b| b != 0xFF) {
        return Err(Error::Protocol("invalid integrity pad"));
    }
    Ok(())
}
