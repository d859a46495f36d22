//! Session state shared by the interpreter and the scheduler.

use fugit::TimerInstantU32;
use heapless::String;

use crate::command::Command;
use crate::sms::MAX_MSISDN_LEN;

/// State of the exchange with the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemState {
    /// Nothing outstanding; the scheduler may issue.
    Idle,
    /// A command has been written and its terminal reply is pending.
    WaitingReply,
    /// The last exchange ended in ERROR. Advisory; scheduling continues.
    Error,
    /// Inside a multi-line unsolicited cascade, waiting for its body line.
    Unsolicited,
}

/// Progress of one negotiated modem setting.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Negotiated {
    /// Actual value unknown; a query is due.
    #[default]
    Unknown,
    /// Known to differ from what we want; a write is due.
    NeedsWrite,
    /// The desired value is in effect.
    Confirmed,
}

impl Negotiated {
    pub fn needs_write(&self) -> bool {
        matches!(self, Self::NeedsWrite)
    }
}

/// Tri-state ledger of every setting negotiated after power-up.
///
/// Settings with a query form start at [`Negotiated::Unknown`] and are
/// read back before any write. Write-only settings start at
/// [`Negotiated::NeedsWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NegotiationFlags {
    pub echo: Negotiated,
    pub clip: Negotiated,
    pub cscs: Negotiated,
    pub cmgf: Negotiated,
    pub cnmi: Negotiated,
    pub cipmux: Negotiated,
    pub clts: Negotiated,
}

impl NegotiationFlags {
    pub const fn initial() -> Self {
        Self {
            echo: Negotiated::NeedsWrite,
            clip: Negotiated::NeedsWrite,
            cscs: Negotiated::NeedsWrite,
            cmgf: Negotiated::Unknown,
            cnmi: Negotiated::Unknown,
            cipmux: Negotiated::Unknown,
            clts: Negotiated::NeedsWrite,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::initial();
    }
}

impl Default for NegotiationFlags {
    fn default() -> Self {
        Self::initial()
    }
}

/// GPRS bearer bring-up progression. Moves strictly forward through
/// CIPSHUT, CSTT, CIICR and CIFSR; a lost bearer (`+PDP: DEACT`) or a
/// modem restart drops it back to `Unknown`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GprsState {
    #[default]
    Unknown,
    IpInitial,
    IpStart,
    IpGprsAct,
    IpStatus,
}

/// The single outstanding command and when it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingCommand<const TIMER_HZ: u32> {
    pub command: Command,
    pub issued_at: TimerInstantU32<TIMER_HZ>,
}

/// Receive path mode: line framing, or counted raw capture of a
/// `+RECEIVE` payload into a connection's inbound ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RxMode {
    Line,
    Payload { connection: usize, remaining: usize },
}

/// Header of a +CMT cascade whose body line is still on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IncomingSmsHeader {
    pub msisdn: String<MAX_MSISDN_LEN>,
    pub timestamp: Option<u32>,
}

/// Last network clock sample and the local instant it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NetworkTime<const TIMER_HZ: u32> {
    pub epoch: u32,
    pub sampled_at: TimerInstantU32<TIMER_HZ>,
}
