//! Text-mode short message types and the single-slot mailboxes.

use heapless::String;

/// Longest message body handled in text mode.
pub const MAX_MESSAGE_LEN: usize = 160;

/// Longest subscriber number, including a leading `+`.
pub const MAX_MSISDN_LEN: usize = 15;

/// A short message received in text mode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShortMessage {
    /// Sender number in the form the network reported it.
    pub msisdn: String<MAX_MSISDN_LEN>,
    /// Message body.
    pub message: String<MAX_MESSAGE_LEN>,
    /// Service centre timestamp as epoch seconds, when the delivery
    /// header carried a parseable one.
    pub timestamp: Option<u32>,
}

/// A message queued for sending with AT+CMGS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundMessage {
    pub msisdn: String<MAX_MSISDN_LEN>,
    pub message: String<MAX_MESSAGE_LEN>,
}

/// One inbound and one outbound message slot.
///
/// Both slots are last-write-wins: a delivery replaces an unread inbound
/// message, and queueing replaces an outbound message the modem has not
/// been handed yet.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    inbound: Option<ShortMessage>,
    outbound: Option<OutboundMessage>,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            inbound: None,
            outbound: None,
        }
    }

    pub fn deliver(&mut self, message: ShortMessage) {
        if self.inbound.is_some() {
            warn!("Unread message replaced by a newer delivery");
        }
        self.inbound = Some(message);
    }

    pub fn message_available(&self) -> bool {
        self.inbound.is_some()
    }

    pub fn take_message(&mut self) -> Option<ShortMessage> {
        self.inbound.take()
    }

    pub fn queue(&mut self, message: OutboundMessage) {
        self.outbound = Some(message);
    }

    pub fn outbound(&self) -> Option<&OutboundMessage> {
        self.outbound.as_ref()
    }

    pub fn take_outbound(&mut self) -> Option<OutboundMessage> {
        self.outbound.take()
    }
}
