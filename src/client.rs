use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use fugit::TimerInstantU32;
use heapless::String;

use crate::clock::Clock;
use crate::command::types::{BatteryStatus, SignalQuality};
use crate::config::Config;
use crate::connection::{ConnectionSlot, Protocol, MAX_ADDRESS_LEN};
use crate::error::Error;
use crate::line::{LineBuffer, LineEvent};
use crate::power::PowerState;
use crate::registration::RegistrationStatus;
use crate::sms::{Mailbox, OutboundMessage, ShortMessage, MAX_MSISDN_LEN};
use crate::state::{
    GprsState, IncomingSmsHeader, ModemState, NegotiationFlags, NetworkTime, PendingCommand,
    RxMode,
};

/// Longest response line kept by the framer. Anything past this is
/// truncated on the wire side before interpretation.
pub(crate) const LINE_CAPACITY: usize = 128;

/// Non-blocking driver for a SimCom GSM/GPRS module on a serial link.
///
/// The driver never waits for the modem. [`GsmClient::process`] reads
/// whatever bytes have arrived, interprets them, and writes at most one
/// command; everything else is bookkeeping on the session state. Call it
/// from the main loop, a tick interrupt, or anywhere else that runs
/// regularly, and use the rest of the API to state intent (connections
/// wanted, messages to send) and to collect results.
///
/// - `S` is the serial link to the module.
/// - `CLK` is a monotonic clock with `TIMER_HZ` ticks per second.
/// - `PWR`/`STAT` are the power key output and status input, see
///   [`Config`].
/// - `N` is the number of connection slots (the module multiplexes up
///   to 6).
/// - `L` sizes each slot's inbound and outbound byte rings.
pub struct GsmClient<S, CLK, PWR, STAT, const TIMER_HZ: u32, const N: usize, const L: usize>
where
    S: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
{
    pub(crate) serial: S,
    pub(crate) timer: CLK,
    pub(crate) config: Config<PWR, STAT>,

    pub(crate) power_state: PowerState,
    pub(crate) desired_power: bool,
    pub(crate) pulse_started: Option<TimerInstantU32<TIMER_HZ>>,

    pub(crate) line: LineBuffer<LINE_CAPACITY>,
    pub(crate) rx_mode: RxMode,

    pub(crate) state: ModemState,
    pub(crate) pending: Option<PendingCommand<TIMER_HZ>>,
    pub(crate) baud_synced: bool,
    pub(crate) flags: NegotiationFlags,

    pub(crate) registration: RegistrationStatus,
    pub(crate) gprs_state: GprsState,
    pub(crate) gprs_enabled: bool,
    pub(crate) local_ip: Option<String<MAX_ADDRESS_LEN>>,

    pub(crate) power_save_desired: bool,
    pub(crate) power_save_active: bool,

    pub(crate) connections: [ConnectionSlot<L>; N],

    pub(crate) mailbox: Mailbox,
    pub(crate) urc_sms: Option<IncomingSmsHeader>,
    pub(crate) urc_started: Option<TimerInstantU32<TIMER_HZ>>,

    pub(crate) incoming_call: bool,
    pub(crate) answer_requested: bool,
    pub(crate) call_in_progress: bool,
    pub(crate) caller_id: Option<String<MAX_MSISDN_LEN>>,

    pub(crate) signal: Option<SignalQuality>,
    pub(crate) battery: Option<BatteryStatus>,
    pub(crate) network_time: Option<NetworkTime<TIMER_HZ>>,

    pub(crate) last_signal_poll: Option<TimerInstantU32<TIMER_HZ>>,
    pub(crate) last_battery_poll: Option<TimerInstantU32<TIMER_HZ>>,
    pub(crate) last_clock_poll: Option<TimerInstantU32<TIMER_HZ>>,
    pub(crate) last_registration_poll: Option<TimerInstantU32<TIMER_HZ>>,
}

impl<S, CLK, PWR, STAT, const TIMER_HZ: u32, const N: usize, const L: usize>
    GsmClient<S, CLK, PWR, STAT, TIMER_HZ, N, L>
where
    S: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    PWR: OutputPin,
    STAT: InputPin,
{
    pub fn new(serial: S, timer: CLK, config: Config<PWR, STAT>) -> Self {
        // without a power key the module is taken to be powered already
        let power_state = if config.pwr_pin.is_some() {
            PowerState::Off
        } else {
            PowerState::On
        };
        GsmClient {
            serial,
            timer,
            config,
            power_state,
            desired_power: true,
            pulse_started: None,
            line: LineBuffer::new(),
            rx_mode: RxMode::Line,
            state: ModemState::Idle,
            pending: None,
            baud_synced: false,
            flags: NegotiationFlags::initial(),
            registration: RegistrationStatus::Unknown,
            gprs_state: GprsState::Unknown,
            gprs_enabled: false,
            local_ip: None,
            power_save_desired: false,
            power_save_active: false,
            connections: core::array::from_fn(|_| ConnectionSlot::new()),
            mailbox: Mailbox::new(),
            urc_sms: None,
            urc_started: None,
            incoming_call: false,
            answer_requested: false,
            call_in_progress: false,
            caller_id: None,
            signal: None,
            battery: None,
            network_time: None,
            last_signal_poll: None,
            last_battery_poll: None,
            last_clock_poll: None,
            last_registration_poll: None,
        }
    }

    /// Drives the session one step. Never blocks.
    ///
    /// Sequences the power key if a transition is wanted, drains and
    /// interprets whatever the modem has sent, abandons an exchange whose
    /// reply deadline has passed, and issues the next command when the
    /// session is free. Call this regularly; every other method only
    /// records intent for this one to act on.
    pub fn process(&mut self) -> Result<(), Error> {
        let now = self.timer.now();
        self.drive_power(now)?;
        self.drain_serial(now)?;
        if self.power_state != PowerState::On {
            return Ok(());
        }
        self.check_timeout(now);
        self.run_scheduler(now)
    }

    fn drain_serial(&mut self, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        while self.serial.read_ready().map_err(|_| Error::Serial)? {
            let mut byte = [0u8; 1];
            match self.serial.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => self.ingest(byte[0], now)?,
                Err(_) => return Err(Error::Serial),
            }
        }
        Ok(())
    }

    fn ingest(&mut self, byte: u8, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        match self.rx_mode {
            RxMode::Payload {
                connection,
                remaining,
            } => {
                if let Some(slot) = self.connections.get_mut(connection) {
                    // a full ring drops the byte; the reader is behind
                    let _ = slot.inbound.push(byte);
                }
                let remaining = remaining - 1;
                self.rx_mode = if remaining == 0 {
                    RxMode::Line
                } else {
                    RxMode::Payload {
                        connection,
                        remaining,
                    }
                };
            }
            RxMode::Line => match self.line.push_byte(byte) {
                LineEvent::Line => {
                    let line = self.line.take();
                    self.handle_line(line.as_str(), now);
                }
                LineEvent::Prompt => self.handle_prompt()?,
                LineEvent::None => {}
            },
        }
        Ok(())
    }

    /// Returns the session to its power-up defaults. Application intent
    /// (wanted connections, queued messages, GPRS on/off) is kept; the
    /// scheduler re-negotiates everything else.
    pub(crate) fn reset_modem_state(&mut self) {
        self.line.clear();
        self.rx_mode = RxMode::Line;
        self.state = ModemState::Idle;
        self.pending = None;
        self.baud_synced = false;
        self.flags.reset();
        self.registration = RegistrationStatus::Unknown;
        self.gprs_state = GprsState::Unknown;
        self.local_ip = None;
        self.power_save_active = false;
        self.urc_sms = None;
        self.urc_started = None;
        self.incoming_call = false;
        self.answer_requested = false;
        self.call_in_progress = false;
        self.caller_id = None;
    }

    fn slot(&self, connection: usize) -> Result<&ConnectionSlot<L>, Error> {
        self.connections
            .get(connection)
            .ok_or(Error::InvalidConnection)
    }

    fn slot_mut(&mut self, connection: usize) -> Result<&mut ConnectionSlot<L>, Error> {
        self.connections
            .get_mut(connection)
            .ok_or(Error::InvalidConnection)
    }

    /// Marks a slot as wanted up. The scheduler opens it once the GPRS
    /// bearer is live and reopens it whenever the modem reports it down.
    pub fn connect(
        &mut self,
        connection: usize,
        protocol: Protocol,
        address: &str,
        port: u16,
    ) -> Result<(), Error> {
        let address = String::try_from(address).map_err(|_| Error::Overflow)?;
        let slot = self.slot_mut(connection)?;
        slot.desired.enabled = true;
        slot.desired.protocol = protocol;
        slot.desired.address = address;
        slot.desired.port = port;
        Ok(())
    }

    /// Marks a slot as wanted down. The close is issued on a later
    /// [`GsmClient::process`] call.
    pub fn disconnect(&mut self, connection: usize) -> Result<(), Error> {
        self.slot_mut(connection)?.desired.enabled = false;
        Ok(())
    }

    pub fn is_connected(&self, connection: usize) -> bool {
        self.slot(connection)
            .map(|slot| slot.is_connected())
            .unwrap_or(false)
    }

    /// Stages bytes for sending on a connection. Returns how many fit in
    /// the outbound ring; the wire write happens over later
    /// [`GsmClient::process`] calls.
    pub fn write_data(&mut self, connection: usize, data: &[u8]) -> Result<usize, Error> {
        let slot = self.slot_mut(connection)?;
        let mut written = 0;
        for &byte in data {
            if slot.outbound.push(byte).is_err() {
                break;
            }
            written += 1;
        }
        Ok(written)
    }

    /// Copies received bytes out of a connection's inbound ring. Returns
    /// how many were copied, 0 when nothing is waiting.
    pub fn read_data(&mut self, connection: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let slot = self.slot_mut(connection)?;
        let mut read = 0;
        for byte in buf.iter_mut() {
            match slot.inbound.pop() {
                Ok(b) => {
                    *byte = b;
                    read += 1;
                }
                Err(_) => break,
            }
        }
        Ok(read)
    }

    /// Bytes waiting to be read from a connection.
    pub fn data_available(&self, connection: usize) -> usize {
        self.slot(connection)
            .map(|slot| slot.inbound.len())
            .unwrap_or(0)
    }

    /// Bytes staged but not yet handed to the modem.
    pub fn pending_outbound(&self, connection: usize) -> usize {
        self.slot(connection)
            .map(|slot| slot.outbound.len())
            .unwrap_or(0)
    }

    pub fn message_available(&self) -> bool {
        self.mailbox.message_available()
    }

    /// Takes the received message out of the single inbound slot.
    pub fn read_message(&mut self) -> Option<ShortMessage> {
        self.mailbox.take_message()
    }

    /// Queues a text-mode message. A queued message that has not reached
    /// the modem yet is replaced.
    pub fn send_message(&mut self, msisdn: &str, message: &str) -> Result<(), Error> {
        let msisdn = String::try_from(msisdn).map_err(|_| Error::Overflow)?;
        let message = String::try_from(message).map_err(|_| Error::Overflow)?;
        self.mailbox.queue(OutboundMessage { msisdn, message });
        Ok(())
    }

    /// Epoch seconds, extrapolated from the last network clock sample.
    /// `None` until a +CCLK reply has been seen.
    pub fn current_time(&mut self) -> Option<u32> {
        let sample = self.network_time?;
        let elapsed = self.timer.now().checked_duration_since(sample.sampled_at)?;
        Some(sample.epoch.saturating_add(elapsed.to_secs()))
    }

    pub fn incoming_call(&self) -> bool {
        self.incoming_call
    }

    /// Requests that the ringing call be answered with ATA. Ignored when
    /// no call is ringing or one is already being answered.
    pub fn answer_incoming_call(&mut self) {
        if self.incoming_call && !self.answer_requested && !self.call_in_progress {
            self.answer_requested = true;
        }
    }

    /// Number of the last caller, when the network passed one with +CLIP.
    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    pub fn is_modem_idle(&self) -> bool {
        self.state == ModemState::Idle
    }

    /// The last exchange was rejected or timed out. Advisory: the
    /// scheduler keeps going and the flag clears on the next exchange.
    pub fn is_modem_error(&self) -> bool {
        self.state == ModemState::Error
    }

    pub fn registration(&self) -> RegistrationStatus {
        self.registration
    }

    pub fn is_registered(&self) -> bool {
        self.registration.registered()
    }

    /// Asks for the GPRS bearer to be brought up with the configured APN.
    pub fn enable_gprs(&mut self) {
        self.gprs_enabled = true;
    }

    pub fn disable_gprs(&mut self) {
        self.gprs_enabled = false;
    }

    /// The bearer is up and connections can be opened.
    pub fn gprs_active(&self) -> bool {
        self.gprs_state == GprsState::IpStatus
    }

    /// Address assigned by the network, once the bearer is up.
    pub fn local_ip(&self) -> Option<&str> {
        self.local_ip.as_deref()
    }

    pub fn enable_power_save(&mut self) {
        self.power_save_desired = true;
    }

    pub fn disable_power_save(&mut self) {
        self.power_save_desired = false;
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        self.signal
    }

    pub fn battery_status(&self) -> Option<BatteryStatus> {
        self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::test_helpers::{go_online, test_client};

    #[test]
    fn online_client_is_quiescent() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");
        assert!(client.is_modem_idle());
    }

    #[test]
    fn connection_is_reconciled_to_connect_ok() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.connect(0, Protocol::Tcp, "93.184.216.34", 80).unwrap();
        assert!(!client.is_connected(0));

        client.process().unwrap();
        assert_eq!(
            serial.take_tx(),
            b"AT+CIPSTART=0,\"TCP\",\"93.184.216.34\",80\r\n"
        );

        serial.inject_line("0, CONNECT OK");
        client.process().unwrap();
        assert!(client.is_connected(0));
        assert!(client.is_modem_idle());
        // settled, nothing further goes out
        assert_eq!(serial.take_tx(), b"");
    }

    #[test]
    fn disconnect_round_trip() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.connections[1].desired.enabled = true;
        client.connections[1].observed = ConnectionState::ConnectOk;

        client.disconnect(1).unwrap();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPCLOSE=1\r\n");

        serial.inject_line("1, CLOSE OK");
        client.process().unwrap();
        assert!(!client.is_connected(1));
        assert_eq!(client.connections[1].observed, ConnectionState::Initial);
    }

    #[test]
    fn send_round_trip_writes_payload_after_prompt() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.connections[0].desired.enabled = true;
        client.connections[0].observed = ConnectionState::ConnectOk;

        assert_eq!(client.write_data(0, b"hello").unwrap(), 5);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSEND=0,5\r\n");

        // payload goes out only on the prompt, and exactly once
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");
        serial.inject(b"> ");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"hello");

        serial.inject_line("0, SEND OK");
        client.process().unwrap();
        assert!(client.is_modem_idle());
        assert_eq!(client.pending_outbound(0), 0);
        assert_eq!(serial.take_tx(), b"");
    }

    #[test]
    fn bytes_queued_during_a_send_wait_for_the_next_one() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.connections[0].desired.enabled = true;
        client.connections[0].observed = ConnectionState::ConnectOk;

        assert_eq!(client.write_data(0, b"hello").unwrap(), 5);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSEND=0,5\r\n");

        // queued after the count was frozen
        assert_eq!(client.write_data(0, b" world").unwrap(), 6);
        serial.inject(b"> ");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"hello");

        // the rest goes out as its own send
        serial.inject_line("0, SEND OK");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSEND=0,6\r\n");
    }

    #[test]
    fn send_message_round_trip() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.send_message("+15551234567", "Hi").unwrap();

        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CMGS=\"+15551234567\"\r\n");

        serial.inject(b"> ");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"Hi\x1a");

        serial.inject_line("+CMGS: 3");
        serial.inject_line("OK");
        client.process().unwrap();
        assert!(client.is_modem_idle());
        assert!(client.mailbox.outbound().is_none());
    }

    #[test]
    fn send_message_rejects_oversized_input() {
        let (mut client, _serial, _timer) = test_client();
        let body = [b'x'; 161];
        let long = core::str::from_utf8(&body).unwrap();
        assert_eq!(client.send_message("+1555", long), Err(Error::Overflow));
        assert_eq!(
            client.send_message("+123456789012345678", "Hi"),
            Err(Error::Overflow)
        );
        assert!(!client.message_available());
    }

    #[test]
    fn reply_timeout_returns_the_session_to_idle() {
        let (mut client, serial, timer) = test_client();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT\r\n");

        // no reply inside the 2 s budget: the exchange is abandoned and
        // the handshake retried in the same call
        timer.advance(2_001);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT\r\n");
    }

    #[test]
    fn invalid_connection_index_is_rejected() {
        let (mut client, _serial, _timer) = test_client();
        assert_eq!(
            client.connect(6, Protocol::Tcp, "10.0.0.1", 80),
            Err(Error::InvalidConnection)
        );
        assert_eq!(client.disconnect(6), Err(Error::InvalidConnection));
        assert_eq!(client.write_data(6, b"x"), Err(Error::InvalidConnection));
        assert!(!client.is_connected(6));
        assert_eq!(client.data_available(6), 0);
    }

    #[test]
    fn write_data_fills_the_ring_and_reports_the_fit() {
        let (mut client, _serial, _timer) = test_client();
        // ring capacity is L - 1 = 31
        assert_eq!(client.write_data(0, &[b'a'; 40]).unwrap(), 31);
        assert_eq!(client.pending_outbound(0), 31);
        assert_eq!(client.write_data(0, b"more").unwrap(), 0);
    }

    #[test]
    fn read_data_drains_what_arrived() {
        let (mut client, _serial, _timer) = test_client();
        for &b in b"abc" {
            client.connections[2].inbound.push(b).unwrap();
        }
        let mut buf = [0u8; 8];
        assert_eq!(client.read_data(2, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(client.read_data(2, &mut buf).unwrap(), 0);
    }

    #[test]
    fn current_time_extrapolates_from_the_last_sample() {
        let (mut client, _serial, timer) = test_client();
        assert_eq!(client.current_time(), None);

        client.network_time = Some(NetworkTime {
            epoch: 1_704_164_645,
            sampled_at: client.timer.now(),
        });
        assert_eq!(client.current_time(), Some(1_704_164_645));
        timer.advance(10_500);
        assert_eq!(client.current_time(), Some(1_704_164_655));
    }

    #[test]
    fn answered_call_lifecycle() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);

        serial.inject_line("RING");
        serial.inject_line("+CLIP: \"+15559876543\",145");
        client.process().unwrap();
        assert!(client.incoming_call());
        assert_eq!(client.caller_id(), Some("+15559876543"));
        assert_eq!(serial.take_tx(), b"");

        client.answer_incoming_call();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"ATA\r\n");

        serial.inject_line("OK");
        client.process().unwrap();
        assert!(!client.incoming_call());
        assert!(client.call_in_progress);

        serial.inject_line("NO CARRIER");
        client.process().unwrap();
        assert!(!client.call_in_progress);
    }

    #[test]
    fn abandoned_call_does_not_answer_the_next_ring() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);

        serial.inject_line("RING");
        client.process().unwrap();
        client.answer_incoming_call();
        // caller hangs up before ATA goes out
        serial.inject_line("NO CARRIER");
        client.process().unwrap();
        assert!(!client.incoming_call());

        // requests without a ringing call do not latch either
        client.answer_incoming_call();
        serial.inject_line("RING");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");

        client.answer_incoming_call();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"ATA\r\n");
    }
}
