//! RMCP+ (IPMI v2.0) LAN backend.
//!
//! One UDP request is outstanding at a time. Responses are matched on the
//! 6-bit requester sequence; every in-session datagram must also carry the
//! next session sequence number.

pub(crate) mod message;
pub(crate) mod rakp;
pub(crate) mod rmcp;
mod session;
pub(crate) mod udp;

pub use session::SessionState;

#[cfg(unix)]
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use crate::commands::{CloseSession, Command, SetSessionPrivilegeLevel};
use crate::config::LanConfig;
use crate::error::{Error, Result};
use crate::transport::Backend;
use crate::types::{Mode, RawResponse, Request, TransportKind};

use session::Session;
use udp::{Datagram, UdpTransport};

/// Close Session: invalid session id, i.e. already gone.
const INVALID_SESSION_ID: u8 = 0x87;

/// A request sent and not yet answered.
#[derive(Debug)]
struct Pending {
    request: Request,
    rq_seq: u8,
    packet: Vec<u8>,
    sends: u32,
    sent_at: Instant,
}

pub(crate) struct LanBackend<D: Datagram = UdpTransport> {
    link: D,
    session: Session,
    timeout: Duration,
    attempts: u32,
    mode: Mode,
    rq_seq: u8,
    pending: Option<Pending>,
}

impl LanBackend<UdpTransport> {
    pub(crate) fn connect(config: &LanConfig) -> Result<Self> {
        let link = UdpTransport::connect(&config.host, config.port, config.timeout)?;
        Self::establish(link, config)
    }
}

impl<D: Datagram> LanBackend<D> {
    /// Negotiate a session over `link` and raise it to the negotiated privilege.
    pub(crate) fn establish(mut link: D, config: &LanConfig) -> Result<Self> {
        link.set_nonblocking(false)?;
        let session = session::establish(&mut link, config)?;

        let mut backend = Self {
            link,
            session,
            timeout: config.timeout,
            attempts: config.attempts(),
            mode: Mode::Blocking,
            rq_seq: 0,
            pending: None,
        };
        if let Err(err) = backend
            .activate()
            .and_then(|()| backend.set_mode(config.mode))
        {
            // Best effort; the setup error is what the caller needs.
            let _ = backend.close();
            return Err(err);
        }
        Ok(backend)
    }

    fn activate(&mut self) -> Result<()> {
        let command = SetSessionPrivilegeLevel {
            privilege: self.session.privilege(),
        };
        let response = self.execute(&command.request())?;
        if matches!(response.completion_code, 0x80 | 0x81) {
            return Err(Error::PrivilegeInsufficient(
                "Set Session Privilege Level refused the negotiated level",
            ));
        }
        let granted = command.parse_response(response)?;
        self.session
            .set_state(SessionState::Established, &format!("privilege {granted:?}"));
        Ok(())
    }

    fn next_rq_seq(&mut self) -> u8 {
        let seq = self.rq_seq;
        self.rq_seq = (self.rq_seq + 1) & 0x3F;
        seq
    }

    fn send_new(&mut self, request: &Request) -> Result<Pending> {
        let rq_seq = self.next_rq_seq();
        let message = message::encode_request(request, rq_seq)?;
        crate::debug::dump_hex("lan message tx", &message);

        let session_seq = self.session.next_out_seq();
        let packet = self.session.seal(session_seq, &message)?;
        self.link.send(&packet)?;

        Ok(Pending {
            request: request.clone(),
            rq_seq,
            packet,
            sends: 1,
            sent_at: Instant::now(),
        })
    }

    fn retransmit(&mut self, pending: &mut Pending) -> Result<()> {
        if pending.sends >= self.attempts {
            return Err(Error::Timeout);
        }
        self.link.send(&pending.packet)?;
        pending.sends += 1;
        pending.sent_at = Instant::now();
        Ok(())
    }

    fn await_response(&mut self, mut pending: Pending) -> Result<RawResponse> {
        loop {
            match self.link.recv() {
                Ok(bytes) => {
                    if let Some(response) = self.accept(&bytes, &pending)? {
                        return Ok(response);
                    }
                    // A stream of stray datagrams must not hold off retransmission.
                    if pending.sent_at.elapsed() >= self.timeout {
                        self.retransmit(&mut pending)?;
                    }
                }
                Err(Error::WouldBlock) if pending.sent_at.elapsed() < self.timeout => {
                    self.pending = Some(pending);
                    return Err(Error::WouldBlock);
                }
                Err(Error::Timeout | Error::WouldBlock) => self.retransmit(&mut pending)?,
                Err(err) => return Err(err),
            }
        }
    }

    /// `Ok(None)` discards the datagram and keeps reading.
    fn accept(&mut self, bytes: &[u8], pending: &Pending) -> Result<Option<RawResponse>> {
        let Some(packet) = self.session.open(bytes)? else {
            return Ok(None);
        };
        self.session.accept_in_seq(packet.header.session_seq)?;

        crate::debug::dump_hex("lan message rx", &packet.payload);
        let response = message::decode_response(&packet.payload)?;
        if !response.answers(&pending.request, pending.rq_seq) {
            return Ok(None);
        }
        Ok(Some(RawResponse {
            cmd: response.cmd,
            completion_code: response.completion_code,
            data: response.data,
        }))
    }

    fn send_close(&mut self) -> Result<()> {
        self.pending = None;
        if self.mode == Mode::NonBlocking {
            self.link.set_nonblocking(false)?;
        }
        let command = CloseSession {
            session_id: self.session.bmc_session_id,
        };
        match self.execute(&command.request()) {
            Ok(response) if response.completion_code == INVALID_SESSION_ID => Ok(()),
            Ok(response) => command.parse_response(response),
            Err(Error::Timeout) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<D: Datagram> Backend for LanBackend<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::Lan
    }

    fn execute(&mut self, request: &Request) -> Result<RawResponse> {
        if !self.session.is_open() {
            return Err(Error::SessionClosed);
        }
        // A different request abandons the pending one; its late answer
        // fails the rq_seq match and is dropped.
        let pending = match self.pending.take() {
            Some(pending) if pending.request == *request => pending,
            _ => self.send_new(request)?,
        };
        self.await_response(pending)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.link.set_nonblocking(mode == Mode::NonBlocking)?;
        self.mode = mode;
        Ok(())
    }

    fn session_state(&self) -> Option<SessionState> {
        Some(self.session.state())
    }

    fn close(&mut self) -> Result<()> {
        if !self.session.is_open() {
            return Ok(());
        }
        let result = self.send_close();
        self.session.set_state(SessionState::Closed, "close session");
        result
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        self.link.readiness_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::CipherSuite;
    use crate::crypto::{SecretBytes, SessionKeys};
    use crate::transport::lan::rakp::{Algorithms, peer, status};
    use crate::transport::lan::rmcp::{Header, payload_type};
    use crate::types::PrivilegeLevel;

    const BMC_SESSION_ID: u32 = 0x0BAD_CAFE;
    const BMC_RANDOM: [u8; 16] = [0x5A; 16];
    const BMC_GUID: [u8; 16] = [0xA5; 16];

    /// Scripted BMC: answers the probe, Open Session, RAKP and in-session requests.
    struct FakeBmc {
        username: Vec<u8>,
        password: Vec<u8>,
        silent: bool,
        /// Cipher suites refused with "no cipher suite match".
        refuse_suites: Vec<Algorithms>,
        /// Open Session role bytes refused with "unauthorized role".
        refuse_roles: Vec<u8>,
        handler: fn(&Request) -> (u8, Vec<u8>),

        nonblocking: bool,
        /// Fail any switch to non-blocking mode.
        refuse_nonblocking: bool,
        /// In-session command bytes, shared so they outlive a failed establish.
        commands: Arc<Mutex<Vec<u8>>>,
        console_session_id: u32,
        console_random: [u8; 16],
        role: u8,
        suite: Option<Algorithms>,
        keys: Option<SessionKeys>,
        bmc_seq: u32,

        /// In-session requests to ignore, simulating loss.
        drop_requests: u32,
        /// Reuse the previous session sequence on the next reply.
        replay_seq: bool,
        /// Precede the next reply with one for a different rq_seq.
        stray_reply: bool,
        /// Queue replies in `held` instead of delivering them.
        hold_replies: bool,
        held: VecDeque<Vec<u8>>,

        inbox: Vec<Vec<u8>>,
        requests: Vec<Request>,
        outbox: VecDeque<Vec<u8>>,
    }

    impl FakeBmc {
        fn new(handler: fn(&Request) -> (u8, Vec<u8>)) -> Self {
            Self {
                username: b"admin".to_vec(),
                password: b"secret".to_vec(),
                silent: false,
                refuse_suites: Vec::new(),
                refuse_roles: Vec::new(),
                handler,
                nonblocking: false,
                refuse_nonblocking: false,
                commands: Arc::default(),
                console_session_id: 0,
                console_random: [0; 16],
                role: 0,
                suite: None,
                keys: None,
                bmc_seq: 0,
                drop_requests: 0,
                replay_seq: false,
                stray_reply: false,
                hold_replies: false,
                held: VecDeque::new(),
                inbox: Vec::new(),
                requests: Vec::new(),
                outbox: VecDeque::new(),
            }
        }

        fn exchange(&self) -> rakp::Exchange<'_> {
            rakp::Exchange {
                console_session_id: self.console_session_id,
                bmc_session_id: BMC_SESSION_ID,
                console_random: self.console_random,
                privilege: PrivilegeLevel::from_u8(self.role).expect("role"),
                username: &self.username,
            }
        }

        fn user_key(&self) -> [u8; 20] {
            *SecretBytes::new(self.password.clone()).to_key_sha1()
        }

        fn reply_pre_session(&mut self, payload_type: u8, payload: Vec<u8>) {
            let packet =
                rmcp::encode(&Header::unauthenticated(payload_type), &payload, None).expect("encode");
            self.outbox.push_back(packet);
        }

        fn in_session_reply(&mut self, request: &Request, rq_seq: u8, cc: u8, data: &[u8]) -> Vec<u8> {
            if !self.replay_seq {
                self.bmc_seq += 1;
            }
            self.replay_seq = false;
            let suite = self.suite.expect("suite");
            let header = Header {
                payload_type: payload_type::IPMI,
                authenticated: suite.integrity != 0,
                encrypted: suite.confidentiality != 0,
                session_id: self.console_session_id,
                session_seq: self.bmc_seq,
            };
            let msg = message::encode_response(request, rq_seq, cc, data);
            rmcp::encode(&header, &msg, self.keys.as_ref()).expect("encode")
        }

        fn handle(&mut self, packet: &[u8]) {
            if packet[4] == 0x00 {
                let msg = rmcp::decode_v15(packet).expect("v1.5");
                let (request, rq_seq) = message::decode_request(msg).expect("probe");
                // IPMI v2.0 data present, v2.0 supported.
                let data = [0x01, 0x80, 0x04, 0x02, 0x00, 0x00, 0x00, 0x00];
                let reply = message::encode_response(&request, rq_seq, 0x00, &data);
                self.outbox.push_back(rmcp::encode_v15(&reply).expect("encode"));
                return;
            }

            let decoded = rmcp::decode(packet, self.keys.as_ref()).expect("decode");
            match decoded.header.payload_type {
                payload_type::OPEN_SESSION_REQUEST => {
                    let (tag, suite, role, console_id) =
                        peer::parse_open_session_request(&decoded.payload);
                    self.console_session_id = console_id;
                    let code = if self.refuse_roles.contains(&role) {
                        status::UNAUTHORIZED_ROLE
                    } else if self.refuse_suites.contains(&suite) {
                        status::NO_CIPHER_SUITE_MATCH
                    } else {
                        self.suite = Some(suite);
                        status::OK
                    };
                    let reply =
                        peer::open_session_response(tag, code, console_id, BMC_SESSION_ID, suite);
                    self.reply_pre_session(payload_type::OPEN_SESSION_RESPONSE, reply);
                }
                payload_type::RAKP_1 => {
                    let (tag, console_random, role, username) = peer::parse_rakp1(&decoded.payload);
                    self.console_random = console_random;
                    self.role = role;
                    let code = if username == self.username {
                        status::OK
                    } else {
                        status::UNAUTHORIZED_NAME
                    };
                    let auth = self
                        .exchange()
                        .rakp2_auth_code(&self.user_key(), &BMC_RANDOM, &BMC_GUID)
                        .expect("auth");
                    let reply = peer::rakp2(
                        tag,
                        code,
                        self.console_session_id,
                        &BMC_RANDOM,
                        &BMC_GUID,
                        &auth,
                    );
                    self.reply_pre_session(payload_type::RAKP_2, reply);
                }
                payload_type::RAKP_3 => {
                    let (tag, auth) = peer::parse_rakp3(&decoded.payload);
                    let user_key = self.user_key();
                    let expected = self
                        .exchange()
                        .rakp3_auth_code(&user_key, &BMC_RANDOM)
                        .expect("auth");
                    let sik = self.exchange().sik(&user_key, &BMC_RANDOM).expect("sik");
                    let icv = self.exchange().rakp4_icv(&sik, &BMC_GUID).expect("icv");
                    let code = if expected == auth {
                        status::OK
                    } else {
                        status::INVALID_INTEGRITY_CHECK_VALUE
                    };
                    self.keys = Some(SessionKeys::derive(&sik).expect("keys"));
                    let reply = peer::rakp4(tag, code, self.console_session_id, &icv);
                    self.reply_pre_session(payload_type::RAKP_4, reply);
                }
                payload_type::IPMI => {
                    let (request, rq_seq) =
                        message::decode_request(&decoded.payload).expect("request");
                    self.requests.push(request.clone());
                    if let Ok(mut commands) = self.commands.lock() {
                        commands.push(request.cmd);
                    }
                    if self.drop_requests > 0 {
                        self.drop_requests -= 1;
                        return;
                    }
                    if self.stray_reply {
                        self.stray_reply = false;
                        let stray = self.in_session_reply(&request, (rq_seq + 1) & 0x3F, 0x00, &[]);
                        self.outbox.push_back(stray);
                    }
                    let (cc, data) = match request.cmd {
                        0x3B => (0x00, request.data.clone()),
                        0x3C => (0x00, Vec::new()),
                        _ => (self.handler)(&request),
                    };
                    let reply = self.in_session_reply(&request, rq_seq, cc, &data);
                    if self.hold_replies {
                        self.held.push_back(reply);
                    } else {
                        self.outbox.push_back(reply);
                    }
                }
                other => panic!("unexpected payload type {other:#04x}"),
            }
        }
    }

    impl Datagram for FakeBmc {
        fn send(&mut self, packet: &[u8]) -> Result<()> {
            self.inbox.push(packet.to_vec());
            if !self.silent {
                self.handle(packet);
            }
            Ok(())
        }

        fn recv(&mut self) -> Result<Vec<u8>> {
            match self.outbox.pop_front() {
                Some(packet) => Ok(packet),
                None if self.nonblocking => Err(Error::WouldBlock),
                None => Err(Error::Timeout),
            }
        }

        fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
            if nonblocking && self.refuse_nonblocking {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "no non-blocking mode",
                )));
            }
            self.nonblocking = nonblocking;
            Ok(())
        }
    }

    fn device_id(_: &Request) -> (u8, Vec<u8>) {
        (0x00, vec![0x20, 0x81, 0x02, 0x10, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x34, 0x12])
    }

    fn config() -> LanConfig {
        LanConfig::new("bmc.test").username("admin").password("secret")
    }

    fn established(bmc: FakeBmc) -> LanBackend<FakeBmc> {
        LanBackend::establish(bmc, &config()).expect("establish")
    }

    fn get_device_id() -> Request {
        Request::new(0x06, 0x01, Vec::new())
    }

    #[test]
    fn establishes_encrypted_session_and_executes() {
        let mut lan = established(FakeBmc::new(device_id));
        assert_eq!(lan.session_state(), Some(SessionState::Established));
        assert_eq!(lan.link.suite, Some(CipherSuite::Suite3.algorithms()));

        // Administrator is requested as "highest level" then set explicitly.
        assert_eq!(lan.link.role, PrivilegeLevel::Administrator.as_u8());
        let set_privilege = &lan.link.requests[0];
        assert_eq!((set_privilege.cmd, set_privilege.data.clone()), (0x3B, vec![0x04]));

        let response = lan.execute(&get_device_id()).expect("execute");
        assert_eq!(response.completion_code, 0x00);
        assert_eq!(response.data[0], 0x20);
        assert_eq!(lan.session.in_seq(), Some(2));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.password = b"other".to_vec();
        let err = LanBackend::establish(bmc, &config()).err().expect("must fail");
        assert!(matches!(err, Error::AuthenticationRejected(_)));
    }

    #[test]
    fn unknown_user_is_rejected() {
        let err = LanBackend::establish(
            FakeBmc::new(device_id),
            &config().username("nobody"),
        )
        .err()
        .expect("must fail");
        assert!(matches!(err, Error::AuthenticationRejected(_)));
    }

    #[test]
    fn falls_back_through_cipher_suites() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.refuse_suites = vec![CipherSuite::Suite3.algorithms()];
        let mut lan = established(bmc);
        assert_eq!(lan.link.suite, Some(CipherSuite::Suite2.algorithms()));
        assert!(lan.execute(&get_device_id()).is_ok());
    }

    #[test]
    fn downgrades_privilege_when_role_refused() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.refuse_roles = vec![0x00];
        let lan = established(bmc);
        assert_eq!(lan.session.privilege(), PrivilegeLevel::Operator);
        assert_eq!(lan.link.requests[0].data, vec![0x03]);
    }

    #[test]
    fn every_role_refused_is_privilege_insufficient() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.refuse_roles = vec![0x00, 0x03, 0x02];
        let err = LanBackend::establish(bmc, &config()).err().expect("must fail");
        assert!(matches!(err, Error::PrivilegeInsufficient(_)));
    }

    #[test]
    fn failed_mode_switch_closes_the_new_session() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.refuse_nonblocking = true;
        let commands = Arc::clone(&bmc.commands);

        let err = LanBackend::establish(bmc, &config().mode(Mode::NonBlocking))
            .err()
            .expect("must fail");
        assert!(matches!(err, Error::Io(_)));
        // Set Session Privilege Level, then Close Session.
        assert_eq!(*commands.lock().expect("lock"), vec![0x3B, 0x3C]);
    }

    #[test]
    fn silent_host_is_unreachable() {
        let mut bmc = FakeBmc::new(device_id);
        bmc.silent = true;
        let err = LanBackend::establish(bmc, &config().retries(2))
            .err()
            .expect("must fail");
        assert!(matches!(err, Error::HostUnreachable(_)));
    }

    #[test]
    fn lost_reply_retransmits_identical_packet() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.link.drop_requests = 1;
        let before = lan.link.inbox.len();

        lan.execute(&get_device_id()).expect("execute");
        let sent = &lan.link.inbox[before..];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[test]
    fn retransmits_are_bounded() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.link.drop_requests = 10;
        let before = lan.link.inbox.len();

        assert!(matches!(lan.execute(&get_device_id()), Err(Error::Timeout)));
        assert_eq!(lan.link.inbox.len() - before, 3);
    }

    #[test]
    fn replayed_session_sequence_is_rejected_without_advancing() {
        let mut lan = established(FakeBmc::new(device_id));
        let baseline = lan.session.in_seq();

        lan.link.replay_seq = true;
        assert!(matches!(
            lan.execute(&get_device_id()),
            Err(Error::SequenceMismatch { .. })
        ));
        assert_eq!(lan.session.in_seq(), baseline);

        // The next in-order reply is still accepted.
        lan.execute(&get_device_id()).expect("in order");
    }

    #[test]
    fn stray_rq_seq_is_discarded() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.link.stray_reply = true;
        let response = lan.execute(&get_device_id()).expect("execute");
        assert_eq!(response.data.len(), 11);
    }

    #[test]
    fn nonblocking_resumes_without_resending() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.set_mode(Mode::NonBlocking).expect("mode");
        lan.link.hold_replies = true;
        let before = lan.link.inbox.len();

        assert!(matches!(lan.execute(&get_device_id()), Err(Error::WouldBlock)));
        assert!(matches!(lan.execute(&get_device_id()), Err(Error::WouldBlock)));
        assert_eq!(lan.link.inbox.len() - before, 1);

        let held = lan.link.held.pop_front().expect("held reply");
        lan.link.outbox.push_back(held);
        assert!(lan.execute(&get_device_id()).is_ok());
        assert_eq!(lan.link.inbox.len() - before, 1);
    }

    #[test]
    fn close_ends_the_session() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.close().expect("close");
        assert_eq!(lan.session_state(), Some(SessionState::Closed));

        let close = lan.link.requests.last().expect("close request");
        assert_eq!(close.cmd, 0x3C);
        assert_eq!(close.data, BMC_SESSION_ID.to_le_bytes().to_vec());

        assert!(matches!(lan.execute(&get_device_id()), Err(Error::SessionClosed)));
        lan.close().expect("second close is a no-op");
    }

    #[test]
    fn close_tolerates_a_silent_bmc() {
        let mut lan = established(FakeBmc::new(device_id));
        lan.link.silent = true;
        lan.close().expect("timeout counts as closed");
        assert_eq!(lan.session_state(), Some(SessionState::Closed));
    }
}
