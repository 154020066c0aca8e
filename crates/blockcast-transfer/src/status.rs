//! Status sub-protocol: receiver-to-sender block reports.
//!
//! Reports travel at QoS 1 on a dedicated status channel, separate from the
//! chunk channel. The sender consumes them for diagnostics only: selective
//! retransmission of missing chunks is a wire-format-supported extension
//! point that is intentionally not implemented.

use tracing::{info, warn};

use blockcast_mqttsn::{Client, DeliveryError, Transport};

use crate::receiver::{CompletionNote, StatusOutlet};
use crate::wire::{BlockStatus, StatusMessage};

/// Publishes the receiver's reports through the delivery engine.
pub struct StatusReporter<'a, T: Transport> {
    client: &'a mut Client<T>,
    status_channel: &'a str,
    event_channel: &'a str,
}

impl<'a, T: Transport> StatusReporter<'a, T> {
    pub fn new(
        client: &'a mut Client<T>,
        status_channel: &'a str,
        event_channel: &'a str,
    ) -> Self {
        Self {
            client,
            status_channel,
            event_channel,
        }
    }
}

impl<T: Transport> StatusOutlet for StatusReporter<'_, T> {
    fn send_status(&mut self, status: &StatusMessage) -> Result<(), DeliveryError> {
        match status.status {
            BlockStatus::Complete => {
                info!(block_id = status.block_id, "reporting block COMPLETE")
            }
            BlockStatus::Missing => warn!(
                block_id = status.block_id,
                missing = status.missing.len(),
                "reporting MISSING chunks"
            ),
        }
        self.client
            .publish(self.status_channel, &status.encode(), 1)
    }

    fn notify_complete(&mut self, note: &CompletionNote) -> Result<(), DeliveryError> {
        let text = format!(
            "BLOCK_RECEIVED: ID={}, SIZE={}, PARTS={}, TYPE={}",
            note.block_id, note.size, note.parts, note.extension
        );
        self.client.publish(self.event_channel, text.as_bytes(), 0)
    }
}

/// Sender-side handling of an incoming status report.
///
/// COMPLETE confirms the last transfer; MISSING is logged with the part
/// list. No retransmission is triggered either way.
pub fn process_status(raw: &[u8]) -> Option<StatusMessage> {
    let Some(report) = StatusMessage::parse(raw) else {
        warn!(len = raw.len(), "dropping malformed status message");
        return None;
    };
    match report.status {
        BlockStatus::Complete => {
            info!(block_id = report.block_id, "receiver confirmed block COMPLETE");
        }
        BlockStatus::Missing => {
            warn!(
                block_id = report.block_id,
                missing = report.missing.len(),
                parts = ?&report.missing[..report.missing.len().min(10)],
                "receiver reports missing chunks; retransmission not implemented"
            );
        }
    }
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_status_parses_reports() {
        let complete = StatusMessage::complete(4);
        assert_eq!(process_status(&complete.encode()), Some(complete));

        let missing = StatusMessage::missing(4, &[3, 7]);
        let parsed = process_status(&missing.encode()).unwrap();
        assert_eq!(parsed.missing, vec![3, 7]);
    }

    #[test]
    fn process_status_drops_garbage() {
        assert_eq!(process_status(&[1, 2]), None);
    }
}
