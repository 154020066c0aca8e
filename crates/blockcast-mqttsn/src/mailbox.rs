//! Bounded single-slot mailbox for a threaded receive path.
//!
//! The producing side copies a datagram into the slot only when the
//! consuming side has a receive request registered; anything arriving
//! without a registered request is dropped and counted. At most one
//! receive request can be outstanding at a time. The lock is held only
//! for the copy; waiting happens on a condvar with a timeout.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

struct Slot {
    /// A consumer is parked in `receive` waiting for data.
    waiting: bool,
    /// The slot holds an undelivered datagram.
    filled: bool,
    len: usize,
    buf: Box<[u8]>,
    dropped: u64,
}

pub struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Mailbox {
    /// Create a mailbox whose slot holds datagrams up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                waiting: false,
                filled: false,
                len: 0,
                buf: vec![0u8; capacity].into_boxed_slice(),
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Offer a datagram from the producing side.
    ///
    /// Returns false (and counts a drop) when no receive request is
    /// registered, the slot is still occupied, or the datagram is oversized.
    pub fn deliver(&self, datagram: &[u8]) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if !slot.waiting || slot.filled || datagram.len() > slot.buf.len() {
            slot.dropped += 1;
            trace!(len = datagram.len(), dropped = slot.dropped, "mailbox drop");
            return false;
        }
        slot.buf[..datagram.len()].copy_from_slice(datagram);
        slot.len = datagram.len();
        slot.filled = true;
        self.ready.notify_one();
        true
    }

    /// Register a receive request and wait up to `timeout` for a datagram.
    ///
    /// Returns the number of bytes copied into `out`, or 0 on timeout.
    /// A second concurrent request is refused (returns 0 immediately).
    pub fn receive(&self, out: &mut [u8], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock().unwrap();
        if slot.waiting {
            return 0;
        }
        slot.waiting = true;

        loop {
            if slot.filled {
                let n = slot.len.min(out.len());
                out[..n].copy_from_slice(&slot.buf[..n]);
                slot.filled = false;
                slot.waiting = false;
                return n;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                slot.waiting = false;
                return 0;
            }
            let (guard, _timeout_result) = self.ready.wait_timeout(slot, remaining).unwrap();
            slot = guard;
        }
    }

    /// Datagrams discarded because no request was registered in time.
    pub fn dropped(&self) -> u64 {
        self.slot.lock().unwrap().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn delivery_without_request_is_dropped() {
        let mailbox = Mailbox::new(64);
        assert!(!mailbox.deliver(b"orphan"));
        assert_eq!(mailbox.dropped(), 1);
    }

    #[test]
    fn handoff_to_waiting_receiver() {
        let mailbox = Arc::new(Mailbox::new(64));
        let producer = mailbox.clone();

        let handle = thread::spawn(move || {
            // Spin until the consumer has registered its request.
            loop {
                if producer.deliver(b"datagram") {
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        let mut buf = [0u8; 64];
        let n = mailbox.receive(&mut buf, Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(&buf[..n], b"datagram");
    }

    #[test]
    fn receive_times_out_empty() {
        let mailbox = Mailbox::new(64);
        let mut buf = [0u8; 64];
        assert_eq!(mailbox.receive(&mut buf, Duration::from_millis(20)), 0);
    }

    #[test]
    fn oversized_datagram_is_dropped() {
        let mailbox = Arc::new(Mailbox::new(4));
        let producer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(!producer.deliver(b"way too large"));
        });
        let mut buf = [0u8; 16];
        assert_eq!(mailbox.receive(&mut buf, Duration::from_millis(100)), 0);
        handle.join().unwrap();
    }
}
