//! Interpretation of everything the modem sends: command replies,
//! unsolicited result codes, and the bare `OK`/`ERROR` terminators.
//!
//! Lines are matched against the outstanding command first by prefix or
//! token, so replies that carry no tag of their own (`CONNECT OK`,
//! `SHUT OK`, a bare IP address) land on the exchange that asked for
//! them. Everything the modem volunteers is picked off before that.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use fugit::TimerInstantU32;
use heapless::{String, Vec};

use crate::client::GsmClient;
use crate::clock::{parse_timestamp, Clock};
use crate::command::types::{BatteryStatus, SignalQuality};
use crate::command::{Command, SMS_NOTIFY_SETTINGS};
use crate::connection::ConnectionState;
use crate::error::Error;
use crate::sms::ShortMessage;
use crate::state::{GprsState, IncomingSmsHeader, ModemState, Negotiated, NetworkTime, RxMode};

const OK: &str = "OK";
const ERROR: &str = "ERROR";
const CONNECT_OK: &str = "CONNECT OK";
const ALREADY_CONNECT: &str = "ALREADY CONNECT";
const CONNECT_FAIL: &str = "CONNECT FAIL";
const SEND_OK: &str = "SEND OK";
const SEND_FAIL: &str = "SEND FAIL";
const CLOSE_OK: &str = "CLOSE OK";
const CLOSED: &str = "CLOSED";
const SHUT_OK: &str = "SHUT OK";
const RING: &str = "RING";
const NO_CARRIER: &str = "NO CARRIER";
const SMS_READY: &str = "SMS Ready";
const PDP_DEACT: &str = "+PDP: DEACT";
const URC_SMS_DELIVERY: &str = "+CMT:";
const URC_CALLER_ID: &str = "+CLIP:";
const URC_PAYLOAD: &str = "+RECEIVE";
const RSP_SIGNAL: &str = "+CSQ:";
const RSP_BATTERY: &str = "+CBC:";
const RSP_REGISTRATION: &str = "+CREG:";
const RSP_CLOCK: &str = "+CCLK:";
const RSP_MUX: &str = "+CIPMUX:";
const RSP_SMS_MODE: &str = "+CMGF:";
const RSP_SMS_NOTIFY: &str = "+CNMI:";
const RSP_SMS_SENT: &str = "+CMGS";

/// Ctrl-Z, terminates a text-mode message body.
pub(crate) const SMS_TERMINATOR: u8 = 0x1a;

/// Connection index at the start of a line, `<n>, <token>`.
fn leading_index(line: &str) -> Option<usize> {
    let digits = line
        .as_bytes()
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    line[..digits].parse().ok()
}

/// The contents of the double-quoted fields of a line, in order.
fn quoted_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split('"').skip(1).step_by(2)
}

/// Copies as much of a modem-sourced string as fits.
fn copy_truncated<const CAP: usize>(s: &str) -> String<CAP> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

impl<S, CLK, PWR, STAT, const TIMER_HZ: u32, const N: usize, const L: usize>
    GsmClient<S, CLK, PWR, STAT, TIMER_HZ, N, L>
where
    S: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    PWR: OutputPin,
    STAT: InputPin,
{
    pub(crate) fn handle_line(&mut self, line: &str, now: TimerInstantU32<TIMER_HZ>) {
        trace!("<- [{}]", line);
        if self.state == ModemState::Unsolicited {
            self.finish_incoming_sms(line);
            return;
        }
        // our own command coming back before echo is switched off
        if line.starts_with("AT") {
            return;
        }
        if self.scan_unsolicited(line, now) {
            return;
        }
        let command = self.pending.as_ref().map(|pending| pending.command.clone());
        if let Some(command) = command {
            if self.interpret_reply(&command, line, now) {
                return;
            }
        }
        if line == OK {
            self.on_generic_ok();
        } else if line.contains(ERROR) {
            self.on_error_token();
        }
    }

    /// Lines the modem sends on its own initiative. Returns true when the
    /// line was one of them.
    fn scan_unsolicited(&mut self, line: &str, now: TimerInstantU32<TIMER_HZ>) -> bool {
        if line == SMS_READY {
            // the modem restarted behind our back
            info!("Modem (re)started, negotiating from scratch");
            self.reset_modem_state();
            return true;
        }
        if line.starts_with(URC_SMS_DELIVERY) {
            self.begin_incoming_sms(line, now);
            return true;
        }
        if line.starts_with(URC_PAYLOAD) {
            self.begin_payload_capture(line);
            return true;
        }
        if line.starts_with(URC_CALLER_ID) {
            if let Some(number) = quoted_fields(line).next() {
                self.caller_id = Some(copy_truncated(number));
            }
            return true;
        }
        if line == NO_CARRIER {
            info!("Call ended");
            self.incoming_call = false;
            self.call_in_progress = false;
            // an accepted but never-answered call must not carry over
            self.answer_requested = false;
            return true;
        }
        if line.starts_with(PDP_DEACT) {
            warn!("GPRS bearer lost");
            self.gprs_state = GprsState::Unknown;
            return true;
        }
        if line.contains(CLOSED) {
            if let Some(index) = leading_index(line) {
                info!("Connection {} closed by the peer", index);
                self.set_observed(index, ConnectionState::Initial);
            }
            return true;
        }
        if line.contains(RING) {
            self.incoming_call = true;
            return true;
        }
        false
    }

    /// Reply lines specific to the outstanding command. Returns true when
    /// the line belonged to it; plain `OK`/`ERROR` terminators keep
    /// falling through to the generic handling.
    fn interpret_reply(
        &mut self,
        command: &Command,
        line: &str,
        now: TimerInstantU32<TIMER_HZ>,
    ) -> bool {
        match command {
            Command::QuerySignal => {
                if let Some(rest) = line.strip_prefix(RSP_SIGNAL) {
                    let mut parts = rest.split(',');
                    let rssi = parts.next().and_then(|s| s.trim().parse().ok());
                    let ber = parts.next().and_then(|s| s.trim().parse().ok());
                    if let (Some(rssi), Some(ber)) = (rssi, ber) {
                        self.signal = Some(SignalQuality { rssi, ber });
                    }
                    return true;
                }
                false
            }
            Command::QueryBattery => {
                if let Some(rest) = line.strip_prefix(RSP_BATTERY) {
                    let mut parts = rest.split(',');
                    let charge_state = parts.next().and_then(|s| s.trim().parse().ok());
                    let charge_level = parts.next().and_then(|s| s.trim().parse().ok());
                    let voltage_mv = parts.next().and_then(|s| s.trim().parse().ok());
                    if let (Some(charge_state), Some(charge_level), Some(voltage_mv)) =
                        (charge_state, charge_level, voltage_mv)
                    {
                        self.battery = Some(BatteryStatus {
                            charge_state,
                            charge_level,
                            voltage_mv,
                        });
                    }
                    return true;
                }
                false
            }
            Command::QueryRegistration => {
                if let Some(rest) = line.strip_prefix(RSP_REGISTRATION) {
                    if let Some(stat) = rest
                        .split(',')
                        .nth(1)
                        .and_then(|s| s.trim().parse::<u8>().ok())
                    {
                        self.registration = stat.into();
                        info!("Registration: {:?}", self.registration);
                    }
                    return true;
                }
                false
            }
            Command::QueryClock => {
                if let Some(rest) = line.strip_prefix(RSP_CLOCK) {
                    if let Some(epoch) = quoted_fields(rest).next().and_then(parse_timestamp) {
                        self.network_time = Some(NetworkTime {
                            epoch,
                            sampled_at: now,
                        });
                    }
                    return true;
                }
                false
            }
            Command::QueryMux => {
                if let Some(rest) = line.strip_prefix(RSP_MUX) {
                    self.flags.cipmux = if rest.trim() == "1" {
                        Negotiated::Confirmed
                    } else {
                        Negotiated::NeedsWrite
                    };
                    return true;
                }
                false
            }
            Command::QuerySmsMode => {
                if let Some(rest) = line.strip_prefix(RSP_SMS_MODE) {
                    self.flags.cmgf = if rest.trim() == "1" {
                        Negotiated::Confirmed
                    } else {
                        Negotiated::NeedsWrite
                    };
                    return true;
                }
                false
            }
            Command::QuerySmsNotify => {
                if let Some(rest) = line.strip_prefix(RSP_SMS_NOTIFY) {
                    self.flags.cnmi = if rest.trim() == SMS_NOTIFY_SETTINGS {
                        Negotiated::Confirmed
                    } else {
                        Negotiated::NeedsWrite
                    };
                    return true;
                }
                false
            }
            Command::QueryLocalIp => {
                // the reply is the bare address, with no OK after it
                if line.contains(ERROR) || !line.starts_with(|c: char| c.is_ascii_digit()) {
                    return false;
                }
                info!("Local IP [{}]", line);
                self.local_ip = Some(copy_truncated(line));
                self.gprs_state = GprsState::IpStatus;
                self.finish_exchange();
                true
            }
            Command::OpenConnection { connection, .. } => {
                if line.contains(CONNECT_OK) || line.contains(ALREADY_CONNECT) {
                    let index = leading_index(line).unwrap_or(*connection);
                    info!("Connection {} up", index);
                    self.set_observed(index, ConnectionState::ConnectOk);
                    self.finish_exchange();
                    true
                } else if line.contains(CONNECT_FAIL) {
                    let index = leading_index(line).unwrap_or(*connection);
                    warn!("Connection {} failed to open", index);
                    self.set_observed(index, ConnectionState::Initial);
                    self.finish_exchange();
                    true
                } else {
                    false
                }
            }
            Command::SendData { connection, .. } => {
                if line.contains(SEND_OK) {
                    if let Some(slot) = self.connections.get_mut(*connection) {
                        slot.pending_send_len = 0;
                    }
                    self.finish_exchange();
                    true
                } else if line.contains(SEND_FAIL) {
                    warn!("Send on connection {} failed", connection);
                    if let Some(slot) = self.connections.get_mut(*connection) {
                        slot.pending_send_len = 0;
                    }
                    self.pending = None;
                    self.state = ModemState::Error;
                    true
                } else {
                    false
                }
            }
            Command::CloseConnection { connection } => {
                if line.contains(CLOSE_OK) {
                    let index = leading_index(line).unwrap_or(*connection);
                    info!("Connection {} down", index);
                    self.set_observed(index, ConnectionState::Initial);
                    self.finish_exchange();
                    true
                } else {
                    false
                }
            }
            Command::ShutBearer => {
                if line == SHUT_OK {
                    // everything the bearer carried is gone with it
                    self.gprs_state = GprsState::IpInitial;
                    for slot in self.connections.iter_mut() {
                        slot.observed = ConnectionState::Initial;
                        slot.pending_send_len = 0;
                    }
                    self.finish_exchange();
                    true
                } else {
                    false
                }
            }
            // the message reference is not used, only the OK after it
            Command::SendSms { .. } => line.starts_with(RSP_SMS_SENT),
            _ => false,
        }
    }

    /// Bare `OK`: the exchange succeeded. Promotes whatever setting the
    /// outstanding command was negotiating and frees the session.
    fn on_generic_ok(&mut self) {
        // a terminal OK also proves the baud lock
        self.baud_synced = true;
        if let Some(pending) = self.pending.take() {
            self.promote(pending.command);
        }
        self.state = ModemState::Idle;
    }

    fn promote(&mut self, command: Command) {
        match command {
            Command::EchoOff => self.flags.echo = Negotiated::Confirmed,
            Command::AnswerCall => {
                info!("Call answered");
                self.call_in_progress = true;
                self.incoming_call = false;
                self.answer_requested = false;
            }
            Command::SetPowerSave { enable } => self.power_save_active = enable,
            Command::EnableTimeSync => self.flags.clts = Negotiated::Confirmed,
            Command::EnableCallerId => self.flags.clip = Negotiated::Confirmed,
            Command::WriteMux => self.flags.cipmux = Negotiated::Confirmed,
            Command::AttachApn { .. } => self.gprs_state = GprsState::IpStart,
            Command::WriteSmsNotify => self.flags.cnmi = Negotiated::Confirmed,
            Command::WriteSmsMode => self.flags.cmgf = Negotiated::Confirmed,
            Command::WriteCharSet => self.flags.cscs = Negotiated::Confirmed,
            Command::ActivateBearer => self.gprs_state = GprsState::IpGprsAct,
            _ => {}
        }
    }

    /// A line carrying `ERROR`: the exchange failed. The session is
    /// marked, not stopped; the scheduler retries on later passes.
    fn on_error_token(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!("Command rejected [{}]", pending.command.get_cmd().as_str());
            if let Command::SendData { connection, .. } = pending.command {
                if let Some(slot) = self.connections.get_mut(connection) {
                    slot.pending_send_len = 0;
                }
            }
        }
        self.state = ModemState::Error;
    }

    fn finish_exchange(&mut self) {
        self.pending = None;
        self.state = ModemState::Idle;
    }

    /// The `>` prompt: the modem is ready for the staged payload.
    pub(crate) fn handle_prompt(&mut self) -> Result<(), Error> {
        let command = match self.pending.as_ref() {
            Some(pending) => pending.command.clone(),
            None => return Ok(()),
        };
        match command {
            Command::SendData { connection, .. } => {
                let mut payload: Vec<u8, L> = Vec::new();
                if let Some(slot) = self.connections.get_mut(connection) {
                    // the count frozen at issue time, not the ring level
                    let length = slot.pending_send_len;
                    while payload.len() < length {
                        match slot.outbound.pop() {
                            Ok(byte) => {
                                let _ = payload.push(byte);
                            }
                            Err(_) => break,
                        }
                    }
                }
                self.serial.write_all(&payload).map_err(|_| Error::Serial)?;
                self.serial.flush().map_err(|_| Error::Serial)?;
            }
            Command::SendSms { .. } => {
                if let Some(outbound) = self.mailbox.take_outbound() {
                    self.serial
                        .write_all(outbound.message.as_bytes())
                        .map_err(|_| Error::Serial)?;
                    self.serial
                        .write_all(&[SMS_TERMINATOR])
                        .map_err(|_| Error::Serial)?;
                    self.serial.flush().map_err(|_| Error::Serial)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// `+CMT: "<sender>",...,"<timestamp>"`. The body follows on its own
    /// line, so the session parks until it arrives.
    fn begin_incoming_sms(&mut self, line: &str, now: TimerInstantU32<TIMER_HZ>) {
        if let Some(pending) = self.pending.take() {
            // the delivery preempted the exchange; it is reissued later
            warn!("Delivery preempted [{}]", pending.command.get_cmd().as_str());
        }
        let msisdn = copy_truncated(quoted_fields(line).next().unwrap_or(""));
        let timestamp = quoted_fields(line).last().and_then(parse_timestamp);
        self.urc_sms = Some(IncomingSmsHeader { msisdn, timestamp });
        self.urc_started = Some(now);
        self.state = ModemState::Unsolicited;
    }

    fn finish_incoming_sms(&mut self, line: &str) {
        if let Some(header) = self.urc_sms.take() {
            let message = ShortMessage {
                msisdn: header.msisdn,
                message: copy_truncated(line),
                timestamp: header.timestamp,
            };
            info!("Message from [{}]", message.msisdn.as_str());
            self.mailbox.deliver(message);
        }
        self.urc_started = None;
        self.state = ModemState::Idle;
    }

    /// `+RECEIVE,<n>,<len>:` announces raw payload bytes. The receive
    /// path leaves line framing until they have all been captured.
    fn begin_payload_capture(&mut self, line: &str) {
        let fields = line
            .trim_start_matches(URC_PAYLOAD)
            .trim_start_matches(',')
            .trim_end_matches(':');
        let mut parts = fields.splitn(2, ',');
        let connection = parts.next().and_then(|s| s.trim().parse::<usize>().ok());
        let length = parts.next().and_then(|s| s.trim().parse::<usize>().ok());
        match (connection, length) {
            (Some(connection), Some(length)) => {
                if connection >= N {
                    // still counted off the wire, then dropped
                    warn!("Payload for unknown connection {}", connection);
                }
                // the whole announced count leaves the wire as payload;
                // the ring keeps what fits
                if length > 0 {
                    self.rx_mode = RxMode::Payload {
                        connection,
                        remaining: length,
                    };
                }
            }
            _ => warn!("Malformed payload announcement [{}]", line),
        }
    }

    pub(crate) fn set_observed(&mut self, connection: usize, state: ConnectionState) {
        if let Some(slot) = self.connections.get_mut(connection) {
            slot.observed = state;
        }
    }
}
