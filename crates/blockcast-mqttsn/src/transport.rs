//! Datagram transport collaborator.
//!
//! The delivery engine talks to the gateway through this trait so the
//! protocol core never owns a socket or an event loop directly. `drive` is
//! the explicit link-servicing hook: the surrounding loop must call it at a
//! bounded interval, and long blocking operations interleave it themselves.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::trace;

/// Unreliable datagram send/receive with timed-blocking reads.
pub trait Transport {
    /// Send one datagram to `dest`.
    fn send(&mut self, dest: SocketAddr, frame: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, waiting at most `timeout`.
    ///
    /// A zero `timeout` polls without blocking. Returns `Ok(0)` when no
    /// datagram arrived in time (not an error).
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Service the underlying link. No-op for transports that need none.
    fn drive(&mut self) {}
}

/// Receive buffer requested from the OS.
const RECV_BUFFER_BYTES: usize = 256 * 1024;

/// Bind a UDP socket for gateway traffic. Port 0 lets the OS pick.
pub(crate) fn bind_udp(local_port: u16) -> io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    socket.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], local_port)).into())?;
    Ok(socket.into())
}

/// Blocking std-UDP transport.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Open the transport on `local_port` (0 = ephemeral).
    pub fn open(local_port: u16) -> io::Result<Self> {
        let socket = bind_udp(local_port)?;
        trace!(local = %socket.local_addr()?, "udp transport open");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, dest: SocketAddr, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, dest).map(|_| ())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if timeout.is_zero() {
            self.socket.set_nonblocking(true)?;
            let result = self.socket.recv_from(buf);
            self.socket.set_nonblocking(false)?;
            return match result {
                Ok((len, _src)) => Ok(len),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            };
        }

        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv_from(buf) {
            Ok((len, _src)) => Ok(len),
            // Windows reports TimedOut, Unix reports WouldBlock.
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_datagram() {
        let mut a = UdpTransport::open(0).unwrap();
        let mut b = UdpTransport::open(0).unwrap();
        let dest = b.local_addr().unwrap();

        a.send(dest, b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = b.receive(&mut buf, Duration::from_millis(500)).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn receive_timeout_yields_zero() {
        let mut t = UdpTransport::open(0).unwrap();
        let mut buf = [0u8; 16];
        let n = t.receive(&mut buf, Duration::from_millis(20)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn nonblocking_poll_yields_zero() {
        let mut t = UdpTransport::open(0).unwrap();
        let mut buf = [0u8; 16];
        let n = t.receive(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(n, 0);
    }
}
