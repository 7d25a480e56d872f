use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Maximum UDP payload we accept.
///
/// IPMI packets are small; 4 KiB is a conservative upper bound.
const MAX_PACKET_SIZE: usize = 4096;

/// A connected datagram link to one BMC.
pub(crate) trait Datagram: Send {
    fn send(&mut self, packet: &[u8]) -> Result<()>;

    /// Next datagram. [`Error::Timeout`] when the read timeout elapses,
    /// [`Error::WouldBlock`] when non-blocking and nothing is queued.
    fn recv(&mut self) -> Result<Vec<u8>>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// Send `packet` and wait for a datagram `accept` recognises.
///
/// `accept` returns `Ok(None)` for datagrams to discard. The identical packet
/// is re-sent once `timeout` passes without an accepted answer, `attempts`
/// sends in total.
pub(crate) fn transact<D, T>(
    link: &mut D,
    packet: &[u8],
    attempts: u32,
    timeout: Duration,
    mut accept: impl FnMut(&[u8]) -> Result<Option<T>>,
) -> Result<T>
where
    D: Datagram + ?Sized,
{
    let attempts = attempts.max(1);
    let mut sends = 0;

    'send: while sends < attempts {
        link.send(packet)?;
        sends += 1;
        let sent_at = Instant::now();
        loop {
            match link.recv() {
                Ok(bytes) => {
                    crate::debug::dump_hex("lan rx", &bytes);
                    if let Some(out) = accept(&bytes)? {
                        return Ok(out);
                    }
                    // Stray datagrams do not extend the wait.
                    if sent_at.elapsed() >= timeout {
                        continue 'send;
                    }
                }
                Err(Error::Timeout) => continue 'send,
                Err(err) => return Err(err),
            }
        }
    }

    Err(Error::Timeout)
}

/// Blocking UDP socket connected to an RMCP+ target.
#[derive(Debug)]
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    nonblocking: bool,
}

impl UdpTransport {
    pub(crate) fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let what = format!("{host}:{port}");
        let target = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::resource(what.clone(), e))?
            .next()
            .ok_or_else(|| {
                Error::resource(
                    what.clone(),
                    io::Error::new(io::ErrorKind::NotFound, "no address resolved"),
                )
            })?;

        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let socket = UdpSocket::bind(bind_addr).map_err(|e| Error::resource(what.clone(), e))?;
        socket
            .connect(target)
            .map_err(|e| Error::resource(what.clone(), e))?;
        socket.set_read_timeout(Some(timeout))?;

        Ok(Self {
            socket,
            nonblocking: false,
        })
    }
}

impl Datagram for UdpTransport {
    fn send(&mut self, packet: &[u8]) -> Result<()> {
        crate::debug::dump_hex("lan tx", packet);
        self.socket.send(packet)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // A blocking read timeout surfaces as EAGAIN on Linux.
            Err(e) if is_timeout(&e) => Err(if self.nonblocking {
                Error::WouldBlock
            } else {
                Error::Timeout
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        self.nonblocking = nonblocking;
        Ok(())
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.socket.as_fd())
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
