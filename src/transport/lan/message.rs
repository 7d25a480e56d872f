//! IPMI LAN message (IPMB-style) framing with both checksums.

use crate::error::{Error, Result};
use crate::types::{Lun, Request};

/// BMC responder address.
const BMC_SLAVE_ADDR: u8 = 0x20;
/// Remote console software id.
const REMOTE_SWID: u8 = 0x81;

fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

/// Encode `request` with the 6-bit requester sequence `rq_seq`.
pub(crate) fn encode_request(request: &Request, rq_seq: u8) -> Result<Vec<u8>> {
    if rq_seq > 0x3F {
        return Err(Error::Protocol("rq_seq must be 6-bit"));
    }

    let netfn_lun = (request.netfn << 2) | request.lun.as_u8();
    let mut msg = Vec::with_capacity(7 + request.data.len());
    msg.push(BMC_SLAVE_ADDR);
    msg.push(netfn_lun);
    msg.push(checksum(&[BMC_SLAVE_ADDR, netfn_lun]));
    msg.push(REMOTE_SWID);
    msg.push(rq_seq << 2);
    msg.push(request.cmd);
    msg.extend_from_slice(&request.data);
    msg.push(checksum(&msg[3..]));
    Ok(msg)
}

/// A checksum-valid LAN response, not yet matched to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Response {
    pub netfn: u8,
    pub lun: Lun,
    pub rq_seq: u8,
    pub cmd: u8,
    pub completion_code: u8,
    pub data: Vec<u8>,
}

impl Response {
    /// Whether this response answers `request` sent with `rq_seq`.
    pub(crate) fn answers(&self, request: &Request, rq_seq: u8) -> bool {
        self.rq_seq == rq_seq
            && self.netfn == request.netfn | 0x01
            && self.cmd == request.cmd
            && self.lun == request.lun
    }
}

/// Decode and checksum a LAN response message.
pub(crate) fn decode_response(msg: &[u8]) -> Result<Response> {
    if msg.len() < 8 {
        return Err(Error::Protocol("IPMI response too short"));
    }
    if !checksum_ok(&msg[..3]) {
        return Err(Error::Protocol("invalid IPMI checksum1"));
    }
    if !checksum_ok(&msg[3..]) {
        return Err(Error::Protocol("invalid IPMI checksum2"));
    }
    if msg[0] != REMOTE_SWID || msg[3] != BMC_SLAVE_ADDR {
        return Err(Error::Protocol("unexpected IPMB addresses"));
    }

    Ok(Response {
        netfn: msg[1] >> 2,
        lun: Lun::from_bits(msg[4]),
        rq_seq: msg[4] >> 2,
        cmd: msg[5],
        completion_code: msg[6],
        data: msg[7..msg.len() - 1].to_vec(),
    })
}

#[cfg(test)]
pub(crate) fn encode_response(request: &Request, rq_seq: u8, cc: u8, data: &[u8]) -> Vec<u8> {
    let netfn_lun = ((request.netfn | 0x01) << 2) | request.lun.as_u8();
    let mut msg = vec![REMOTE_SWID, netfn_lun, checksum(&[REMOTE_SWID, netfn_lun])];
    msg.extend_from_slice(&[BMC_SLAVE_ADDR, (rq_seq << 2) | request.lun.as_u8(), request.cmd, cc]);
    msg.extend_from_slice(data);
    msg.push(checksum(&msg[3..]));
    msg
}

#[cfg(test)]
pub(crate) fn decode_request(msg: &[u8]) -> Option<(Request, u8)> {
    if msg.len() < 7 || !checksum_ok(&msg[..3]) || !checksum_ok(&msg[3..]) {
        return None;
    }
    let request = Request::new(msg[1] >> 2, msg[5], msg[6..msg.len() - 1].to_vec())
        .with_lun(Lun::from_bits(msg[1]));
    Some((request, msg[4] >> 2))
}
