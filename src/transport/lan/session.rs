//! RMCP+ session negotiation and per-session sequence state.

use core::fmt;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::commands::{Command, GetChannelAuthCapabilities};
use crate::config::LanConfig;
use crate::crypto::{SessionKeys, ct_eq};
use crate::error::{Error, Result};
use crate::transport::lan::rakp::{self, Algorithms, Rejection};
use crate::transport::lan::rmcp::{self, Header, Packet, payload_type};
use crate::transport::lan::udp::{Datagram, transact};
use crate::transport::lan::message;
use crate::types::{ChannelAuthCapabilities, PrivilegeLevel, RawResponse};

/// Lifecycle of a LAN session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists.
    Unestablished,
    /// Probe, Open Session or RAKP exchange in progress.
    Negotiating,
    /// Commands may be sent.
    Established,
    /// The session was closed and cannot be reused.
    Closed,
}

impl SessionState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Unestablished => "unestablished",
            Self::Negotiating => "negotiating",
            Self::Established => "established",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Session {
    state: SessionState,
    /// Managed system id; carried by every outbound packet.
    pub(crate) bmc_session_id: u32,
    /// Remote console id; carried by every inbound packet.
    pub(crate) console_session_id: u32,
    keys: Option<SessionKeys>,
    integrity: bool,
    confidentiality: bool,
    out_seq: u32,
    in_seq: Option<u32>,
    privilege: PrivilegeLevel,
}

impl Session {
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub(crate) fn set_state(&mut self, state: SessionState, detail: &str) {
        self.state = state;
        crate::observe::record_session(state.as_str(), detail);
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(
            self.state,
            SessionState::Negotiating | SessionState::Established
        )
    }

    /// Sequence number for a new request. Retransmissions reuse the old one.
    pub(crate) fn next_out_seq(&mut self) -> u32 {
        self.out_seq = self.out_seq.wrapping_add(1);
        if self.out_seq == 0 {
            self.out_seq = 1;
        }
        self.out_seq
    }

    /// Check an inbound session sequence number and advance the baseline.
    pub(crate) fn accept_in_seq(&mut self, seq: u32) -> Result<()> {
        if seq == 0 && !self.integrity {
            return Ok(());
        }
        match self.in_seq {
            Some(prev) if seq != prev.wrapping_add(1) => Err(Error::SequenceMismatch {
                expected: prev.wrapping_add(1),
                actual: seq,
            }),
            _ => {
                self.in_seq = Some(seq);
                Ok(())
            }
        }
    }

    /// Frame an IPMI LAN message for this session.
    pub(crate) fn seal(&self, session_seq: u32, message: &[u8]) -> Result<Vec<u8>> {
        let header = Header {
            payload_type: payload_type::IPMI,
            authenticated: self.integrity,
            encrypted: self.confidentiality,
            session_id: self.bmc_session_id,
            session_seq,
        };
        rmcp::encode(&header, message, self.keys.as_ref())
    }

    /// Decode an inbound packet. `Ok(None)` means it belongs to another session.
    pub(crate) fn open(&self, bytes: &[u8]) -> Result<Option<Packet>> {
        let packet = rmcp::decode(bytes, self.keys.as_ref())?;
        if packet.header.session_id != self.console_session_id
            || packet.header.payload_type != payload_type::IPMI
        {
            return Ok(None);
        }
        if self.integrity && !packet.header.authenticated {
            return Err(Error::Protocol("unauthenticated packet on an integrity-protected session"));
        }
        if self.confidentiality && !packet.header.encrypted {
            return Err(Error::Protocol("unencrypted packet on a confidential session"));
        }
        Ok(Some(packet))
    }

    #[cfg(test)]
    pub(crate) fn in_seq(&self) -> Option<u32> {
        self.in_seq
    }

    #[cfg(test)]
    pub(crate) fn new_test(integrity: bool, keys: Option<SessionKeys>) -> Self {
        Self {
            state: SessionState::Established,
            bmc_session_id: 0x0200_0001,
            console_session_id: 0x0100_0001,
            keys,
            integrity,
            confidentiality: false,
            out_seq: 0,
            in_seq: None,
            privilege: PrivilegeLevel::Administrator,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("bmc_session_id", &format_args!("{:#010x}", self.bmc_session_id))
            .field(
                "console_session_id",
                &format_args!("{:#010x}", self.console_session_id),
            )
            .field("integrity", &self.integrity)
            .field("confidentiality", &self.confidentiality)
            .field("out_seq", &self.out_seq)
            .field("in_seq", &self.in_seq)
            .field("privilege", &self.privilege)
            .finish()
    }
}

/// Run the probe, Open Session and RAKP 1-4 exchanges.
///
/// The returned session is `Negotiating`; the caller finishes with Set
/// Session Privilege Level in-session and marks it `Established`.
pub(crate) fn establish<D: Datagram + ?Sized>(link: &mut D, config: &LanConfig) -> Result<Session> {
    crate::observe::record_session(SessionState::Negotiating.as_str(), &config.host);

    let caps = probe(link, config)?;
    if !caps.supports_ipmi_v2_0 {
        return Err(Error::Unsupported("BMC does not support IPMI v2.0 RMCP+ sessions"));
    }

    let mut rng = rand::rng();
    let console_session_id = loop {
        let id = rng.next_u32();
        if id != 0 {
            break id;
        }
    };

    let (opened, privilege) = open_session(link, config, console_session_id)?;
    crate::observe::record_session(
        SessionState::Negotiating.as_str(),
        "open session accepted",
    );

    let mut console_random = [0u8; 16];
    rng.fill_bytes(&mut console_random);
    let exchange = rakp::Exchange {
        console_session_id,
        bmc_session_id: opened.bmc_session_id,
        console_random,
        privilege,
        username: &config.username,
    };

    // --- RAKP 1 / 2 ---
    let tag = (rng.next_u32() & 0xFF) as u8;
    let packet = rmcp::encode(
        &Header::unauthenticated(payload_type::RAKP_1),
        &exchange.rakp1(tag)?,
        None,
    )?;
    let rakp2 = transact(link, &packet, config.attempts(), config.timeout, |bytes| {
        let Some(payload) = pre_session_payload(bytes, payload_type::RAKP_2)? else {
            return Ok(None);
        };
        let msg = rakp::parse_rakp2(&payload)?;
        Ok((msg.tag == tag).then_some(msg))
    })?;
    if rakp2.status != rakp::status::OK {
        return Err(rejection(rakp2.status, "RAKP message 2"));
    }
    if rakp2.console_session_id != console_session_id {
        return Err(Error::Protocol("RAKP message 2 remote session id mismatch"));
    }

    let user_key = config.password.to_key_sha1();
    let kg = match &config.bmc_key {
        Some(kg) => kg.to_key_sha1(),
        None => user_key.clone(),
    };

    let expected = exchange.rakp2_auth_code(&user_key, &rakp2.bmc_random, &rakp2.bmc_guid)?;
    if !ct_eq(&expected, &rakp2.auth_code) {
        return Err(Error::AuthenticationRejected(
            "RAKP message 2 key exchange code mismatch",
        ));
    }

    let sik = Zeroizing::new(exchange.sik(&kg, &rakp2.bmc_random)?);

    // --- RAKP 3 / 4 ---
    let tag = (rng.next_u32() & 0xFF) as u8;
    let auth_code = exchange.rakp3_auth_code(&user_key, &rakp2.bmc_random)?;
    let packet = rmcp::encode(
        &Header::unauthenticated(payload_type::RAKP_3),
        &rakp::rakp3(tag, opened.bmc_session_id, &auth_code),
        None,
    )?;
    let rakp4 = transact(link, &packet, config.attempts(), config.timeout, |bytes| {
        let Some(payload) = pre_session_payload(bytes, payload_type::RAKP_4)? else {
            return Ok(None);
        };
        let msg = rakp::parse_rakp4(&payload)?;
        Ok((msg.tag == tag).then_some(msg))
    })?;
    if rakp4.status != rakp::status::OK {
        return Err(rejection(rakp4.status, "RAKP message 4"));
    }
    if rakp4.console_session_id != console_session_id {
        return Err(Error::Protocol("RAKP message 4 remote session id mismatch"));
    }

    let expected = exchange.rakp4_icv(&sik, &rakp2.bmc_guid)?;
    if !ct_eq(&expected, &rakp4.icv) {
        return Err(Error::AuthenticationRejected(
            "RAKP message 4 integrity check value mismatch",
        ));
    }

    let suite = opened.suite;
    let keys = if suite.integrity != 0 || suite.confidentiality != 0 {
        Some(SessionKeys::derive(&sik)?)
    } else {
        None
    };

    crate::observe::record_session(SessionState::Negotiating.as_str(), "rakp complete");
    Ok(Session {
        state: SessionState::Negotiating,
        bmc_session_id: opened.bmc_session_id,
        console_session_id,
        keys,
        integrity: suite.integrity != 0,
        confidentiality: suite.confidentiality != 0,
        out_seq: 0,
        in_seq: None,
        privilege,
    })
}

/// Pre-session Get Channel Authentication Capabilities in IPMI v1.5 framing.
fn probe<D: Datagram + ?Sized>(link: &mut D, config: &LanConfig) -> Result<ChannelAuthCapabilities> {
    let v2 = GetChannelAuthCapabilities::new(config.channel, config.privilege);
    let response = match probe_once(link, config, &v2) {
        // Some v1.5-only BMCs reject the v2.0 data bit outright.
        Ok(response) if response.completion_code != 0x00 => {
            probe_once(link, config, &v2.without_v2_data())?
        }
        other => other?,
    };
    v2.parse_response(response)
}

fn probe_once<D: Datagram + ?Sized>(
    link: &mut D,
    config: &LanConfig,
    command: &GetChannelAuthCapabilities,
) -> Result<RawResponse> {
    let request = command.request();
    let packet = rmcp::encode_v15(&message::encode_request(&request, 0)?)?;

    let result = transact(link, &packet, config.attempts(), config.timeout, |bytes| {
        let Ok(msg) = rmcp::decode_v15(bytes) else {
            return Ok(None);
        };
        let response = message::decode_response(msg)?;
        Ok(response.answers(&request, 0).then(|| RawResponse {
            cmd: response.cmd,
            completion_code: response.completion_code,
            data: response.data,
        }))
    });

    match result {
        Err(Error::Timeout) => Err(Error::HostUnreachable(format!(
            "{}:{} did not answer the authentication capabilities probe",
            config.host, config.port
        ))),
        other => other,
    }
}

/// Walk privilege levels (outer) and cipher suites (inner) until one opens.
fn open_session<D: Datagram + ?Sized>(
    link: &mut D,
    config: &LanConfig,
    console_session_id: u32,
) -> Result<(rakp::OpenSessionResponse, PrivilegeLevel)> {
    let mut rng = rand::rng();

    'privileges: for &privilege in config.privilege.downgrade_order() {
        for suite in &config.cipher_suites {
            let requested: Algorithms = suite.algorithms();
            let tag = (rng.next_u32() & 0xFF) as u8;
            let payload = rakp::open_session_request(tag, privilege, console_session_id, requested);
            let packet = rmcp::encode(
                &Header::unauthenticated(payload_type::OPEN_SESSION_REQUEST),
                &payload,
                None,
            )?;

            let response = transact(link, &packet, config.attempts(), config.timeout, |bytes| {
                let Some(payload) = pre_session_payload(bytes, payload_type::OPEN_SESSION_RESPONSE)?
                else {
                    return Ok(None);
                };
                let msg = rakp::parse_open_session_response(&payload)?;
                Ok((msg.tag == tag).then_some(msg))
            })?;

            if response.status == rakp::status::OK {
                if response.console_session_id != console_session_id {
                    return Err(Error::Protocol("Open Session remote session id mismatch"));
                }
                if response.suite != requested {
                    return Err(Error::Unsupported(
                        "managed system selected a different cipher suite",
                    ));
                }
                if privilege != config.privilege {
                    crate::observe::record_session(
                        SessionState::Negotiating.as_str(),
                        "privilege downgraded",
                    );
                }
                return Ok((response, privilege));
            }

            match rakp::classify_status(response.status) {
                Rejection::CipherSuite => continue,
                Rejection::Privilege => continue 'privileges,
                Rejection::Credentials => {
                    return Err(Error::AuthenticationRejected("Open Session refused credentials"));
                }
                Rejection::Other => {
                    return Err(Error::protocol_owned(format!(
                        "Open Session rejected by managed system (status {:#04x})",
                        response.status
                    )));
                }
            }
        }
        return Err(Error::Unsupported(
            "managed system accepted none of the configured cipher suites",
        ));
    }

    Err(Error::PrivilegeInsufficient(
        "no privilege level in the downgrade order was granted",
    ))
}

/// Payload of an unauthenticated RMCP+ packet of `expected` type, if it is one.
fn pre_session_payload(bytes: &[u8], expected: u8) -> Result<Option<Vec<u8>>> {
    let Ok(packet) = rmcp::decode(bytes, None) else {
        return Ok(None);
    };
    if packet.header.payload_type != expected {
        return Ok(None);
    }
    Ok(Some(packet.payload))
}

fn rejection(status: u8, step: &'static str) -> Error {
    match rakp::classify_status(status) {
        Rejection::Privilege => Error::PrivilegeInsufficient(step),
        _ => Error::AuthenticationRejected(step),
    }
}
