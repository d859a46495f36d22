//! Multiplexed TCP/UDP connection slots.
//!
//! Each slot pairs what the application wants the connection to be with
//! what the modem last reported it to be. The scheduler closes the gap
//! one command at a time; nothing here talks to the wire.

pub mod ring_buffer;

use heapless::String;

pub use ring_buffer::RingBuffer;

/// Longest remote address handed to CIPSTART (dotted quad).
pub const MAX_ADDRESS_LEN: usize = 15;

/// Largest payload handed to the module in one CIPSEND.
pub(crate) const MAX_PAYLOAD_CHUNK: usize = 1460;

/// Transport protocol of a connection slot.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// Connection phase as last reported by the modem.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    #[default]
    Unknown,
    Initial,
    Start,
    Config,
    GprsAct,
    Status,
    PdpDeact,
    ConnectOk,
    Closed,
}

/// What the application wants a slot to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DesiredConnection {
    pub enabled: bool,
    pub address: String<MAX_ADDRESS_LEN>,
    pub port: u16,
    pub protocol: Protocol,
}

impl DesiredConnection {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            port: 0,
            protocol: Protocol::Tcp,
        }
    }
}

/// One connection slot: desired endpoint, observed state, and payload
/// staged in each direction.
pub(crate) struct ConnectionSlot<const L: usize> {
    pub desired: DesiredConnection,
    pub observed: ConnectionState,
    pub inbound: RingBuffer<L>,
    pub outbound: RingBuffer<L>,
    /// Byte count frozen when CIPSEND was issued for this slot.
    pub pending_send_len: usize,
}

impl<const L: usize> ConnectionSlot<L> {
    pub const fn new() -> Self {
        Self {
            desired: DesiredConnection::new(),
            observed: ConnectionState::Unknown,
            inbound: RingBuffer::new(),
            outbound: RingBuffer::new(),
            pending_send_len: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.observed == ConnectionState::ConnectOk
    }

    /// An open round-trip is due: wanted up, not observed up, and the
    /// endpoint is actually filled in.
    pub fn wants_open(&self) -> bool {
        self.desired.enabled
            && self.observed != ConnectionState::ConnectOk
            && !self.desired.address.is_empty()
            && self.desired.port != 0
    }

    /// A close round-trip is due.
    pub fn wants_close(&self) -> bool {
        !self.desired.enabled && self.observed == ConnectionState::ConnectOk
    }

    /// A data send is due.
    pub fn wants_send(&self) -> bool {
        self.observed == ConnectionState::ConnectOk && !self.outbound.is_empty()
    }
}

impl<const L: usize> Default for ConnectionSlot<L> {
    fn default() -> Self {
        Self::new()
    }
}
