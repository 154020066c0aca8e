//! Event-driven receive path: a reader thread feeding the single-slot
//! mailbox.
//!
//! The reader vacuums datagrams off a cloned socket with a short read
//! timeout so it can observe shutdown; each datagram is offered to the
//! mailbox and silently dropped when the consuming side has no receive
//! request registered. Sends go straight out the socket from the calling
//! context.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::MAX_FRAME;
use crate::mailbox::Mailbox;
use crate::transport::{Transport, bind_udp};

/// Reader poll interval; bounds shutdown latency.
const READER_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ThreadedUdpTransport {
    socket: UdpSocket,
    mailbox: Arc<Mailbox>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl ThreadedUdpTransport {
    /// Open the transport on `local_port` and start the reader thread.
    pub fn open(local_port: u16) -> io::Result<Self> {
        let socket = bind_udp(local_port)?;
        let reader_socket = socket.try_clone()?;
        reader_socket.set_read_timeout(Some(READER_TIMEOUT))?;

        let mailbox = Arc::new(Mailbox::new(MAX_FRAME));
        let stop = Arc::new(AtomicBool::new(false));

        let reader_mailbox = mailbox.clone();
        let reader_stop = stop.clone();
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_FRAME];
            loop {
                if reader_stop.load(Ordering::Relaxed) {
                    return;
                }
                match reader_socket.recv_from(&mut buf) {
                    Ok((len, _src)) => {
                        reader_mailbox.deliver(&buf[..len]);
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        warn!("reader thread receive error: {}", e);
                        return;
                    }
                }
            }
        });

        debug!(local = %socket.local_addr()?, "threaded udp transport open");
        Ok(Self {
            socket,
            mailbox,
            stop,
            reader: Some(reader),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Datagrams the mailbox discarded for lack of a registered request.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped()
    }
}

impl Transport for ThreadedUdpTransport {
    fn send(&mut self, dest: SocketAddr, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, dest).map(|_| ())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        Ok(self.mailbox.receive(buf, timeout))
    }
}

impl Drop for ThreadedUdpTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receives_through_mailbox() {
        let mut t = ThreadedUdpTransport::open(0).unwrap();
        let dest = t.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();

        // Register the receive request first, then send from a helper thread
        // so the reader has a waiting consumer.
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            peer.send_to(b"via mailbox", ("127.0.0.1", dest.port()))
                .unwrap();
        });

        let mut buf = [0u8; MAX_FRAME];
        let n = t.receive(&mut buf, Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
        assert_eq!(&buf[..n], b"via mailbox");
    }

    #[test]
    fn unrequested_datagram_is_dropped() {
        let t = ThreadedUdpTransport::open(0).unwrap();
        let dest = t.local_addr().unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.send_to(b"orphan", ("127.0.0.1", dest.port())).unwrap();

        // Give the reader time to pull it off the socket with nobody waiting.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(t.dropped(), 1);
    }
}
