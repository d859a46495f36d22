//! Priority scheduler. One pass picks the single most urgent command
//! whose preconditions hold and writes it to the wire; everything else
//! waits for a later pass.
//!
//! The order is fixed: link health first (baud lock, echo), then calls,
//! then the periodic polls, then network registration as a gate in
//! front of everything that needs the network, then setting
//! negotiation, bearer bring-up and finally per-connection work.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use fugit::{TimerDurationU32, TimerInstantU32};

use crate::client::GsmClient;
use crate::clock::Clock;
use crate::command::Command;
use crate::connection::MAX_PAYLOAD_CHUNK;
use crate::error::Error;
use crate::module_timing::{
    battery_poll_period, clock_poll_period, registration_poll_period, signal_poll_period,
    urc_body_time,
};
use crate::state::{GprsState, ModemState, Negotiated, PendingCommand};

fn poll_due<const TIMER_HZ: u32>(
    last: Option<TimerInstantU32<TIMER_HZ>>,
    period: TimerDurationU32<TIMER_HZ>,
    now: TimerInstantU32<TIMER_HZ>,
) -> bool {
    match last {
        None => true,
        Some(last) => now
            .checked_duration_since(last)
            .map(|elapsed| elapsed >= period)
            .unwrap_or(false),
    }
}

impl<S, CLK, PWR, STAT, const TIMER_HZ: u32, const N: usize, const L: usize>
    GsmClient<S, CLK, PWR, STAT, TIMER_HZ, N, L>
where
    S: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    PWR: OutputPin,
    STAT: InputPin,
{
    pub(crate) fn run_scheduler(&mut self, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        if !matches!(self.state, ModemState::Idle | ModemState::Error) {
            return Ok(());
        }
        if let Some(command) = self.next_command(now) {
            self.issue(command, now)?;
        }
        Ok(())
    }

    /// The most urgent command that is due, if any. Poll stamps are
    /// taken here, at the decision, so a reply that never comes does
    /// not make the poll fire back to back.
    fn next_command(&mut self, now: TimerInstantU32<TIMER_HZ>) -> Option<Command> {
        if !self.baud_synced {
            return Some(Command::At);
        }
        if self.flags.echo.needs_write() {
            return Some(Command::EchoOff);
        }
        if self.incoming_call && self.answer_requested && !self.call_in_progress {
            return Some(Command::AnswerCall);
        }
        if poll_due(self.last_signal_poll, signal_poll_period(), now) {
            self.last_signal_poll = Some(now);
            return Some(Command::QuerySignal);
        }
        if poll_due(self.last_battery_poll, battery_poll_period(), now) {
            self.last_battery_poll = Some(now);
            return Some(Command::QueryBattery);
        }
        if !self.registration.registered() {
            // off the network nothing below can succeed
            if poll_due(self.last_registration_poll, registration_poll_period(), now) {
                self.last_registration_poll = Some(now);
                return Some(Command::QueryRegistration);
            }
            return None;
        }
        if self.power_save_desired != self.power_save_active {
            return Some(Command::SetPowerSave {
                enable: self.power_save_desired,
            });
        }
        if self.flags.clts.needs_write() {
            return Some(Command::EnableTimeSync);
        }
        if self.flags.clip.needs_write() {
            return Some(Command::EnableCallerId);
        }
        match self.flags.cipmux {
            Negotiated::Unknown => return Some(Command::QueryMux),
            Negotiated::NeedsWrite => return Some(Command::WriteMux),
            Negotiated::Confirmed => {}
        }
        if self.gprs_state == GprsState::Unknown
            || (!self.gprs_enabled && self.gprs_state != GprsState::IpInitial)
        {
            return Some(Command::ShutBearer);
        }
        if self.gprs_enabled && self.gprs_state == GprsState::IpInitial {
            return Some(Command::AttachApn {
                apn: self.config.apn.clone(),
            });
        }
        match self.flags.cnmi {
            Negotiated::Unknown => return Some(Command::QuerySmsNotify),
            Negotiated::NeedsWrite => return Some(Command::WriteSmsNotify),
            Negotiated::Confirmed => {}
        }
        match self.flags.cmgf {
            Negotiated::Unknown => return Some(Command::QuerySmsMode),
            Negotiated::NeedsWrite => return Some(Command::WriteSmsMode),
            Negotiated::Confirmed => {}
        }
        if self.flags.cscs.needs_write() {
            return Some(Command::WriteCharSet);
        }
        if poll_due(self.last_clock_poll, clock_poll_period(), now) {
            self.last_clock_poll = Some(now);
            return Some(Command::QueryClock);
        }
        if self.gprs_enabled {
            match self.gprs_state {
                GprsState::IpStart => return Some(Command::ActivateBearer),
                GprsState::IpGprsAct => return Some(Command::QueryLocalIp),
                _ => {}
            }
        }
        if self.gprs_state == GprsState::IpStatus {
            for (index, slot) in self.connections.iter().enumerate() {
                if slot.wants_open() {
                    return Some(Command::OpenConnection {
                        connection: index,
                        protocol: slot.desired.protocol,
                        address: slot.desired.address.clone(),
                        port: slot.desired.port,
                    });
                }
            }
            for (index, slot) in self.connections.iter().enumerate() {
                if slot.wants_send() {
                    return Some(Command::SendData {
                        connection: index,
                        length: slot.outbound.len().min(MAX_PAYLOAD_CHUNK),
                    });
                }
            }
        }
        for (index, slot) in self.connections.iter().enumerate() {
            if slot.wants_close() {
                return Some(Command::CloseConnection { connection: index });
            }
        }
        if let Some(outbound) = self.mailbox.outbound() {
            return Some(Command::SendSms {
                msisdn: outbound.msisdn.clone(),
            });
        }
        None
    }

    fn issue(&mut self, command: Command, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        // the byte count is frozen now; anything queued later waits for
        // the next send
        if let Command::SendData { connection, length } = command {
            if let Some(slot) = self.connections.get_mut(connection) {
                slot.pending_send_len = length;
            }
        }
        let line = command.get_cmd();
        debug!("-> [{}]", line.as_str());
        self.serial
            .write_all(line.as_bytes())
            .map_err(|_| Error::Serial)?;
        self.serial.write_all(b"\r\n").map_err(|_| Error::Serial)?;
        self.serial.flush().map_err(|_| Error::Serial)?;
        self.pending = Some(PendingCommand { command, issued_at: now });
        self.state = ModemState::WaitingReply;
        Ok(())
    }

    /// Abandons an exchange whose reply never came, and the body wait of
    /// an unsolicited cascade that never completed.
    pub(crate) fn check_timeout(&mut self, now: TimerInstantU32<TIMER_HZ>) {
        match self.state {
            ModemState::WaitingReply => {
                let expired = self
                    .pending
                    .as_ref()
                    .map(|pending| {
                        let budget = TimerDurationU32::<TIMER_HZ>::millis(
                            pending.command.max_timeout_ms(),
                        );
                        now.checked_duration_since(pending.issued_at)
                            .map(|waited| waited >= budget)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if expired {
                    if let Some(pending) = self.pending.take() {
                        warn!("No reply to [{}]", pending.command.get_cmd().as_str());
                        if let Command::SendData { connection, .. } = pending.command {
                            if let Some(slot) = self.connections.get_mut(connection) {
                                slot.pending_send_len = 0;
                            }
                        }
                    }
                    self.state = ModemState::Idle;
                }
            }
            ModemState::Unsolicited => {
                let expired = self
                    .urc_started
                    .map(|started| {
                        now.checked_duration_since(started)
                            .map(|waited| waited >= urc_body_time::<TIMER_HZ>())
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if expired {
                    warn!("Unsolicited body never arrived");
                    self.urc_sms = None;
                    self.urc_started = None;
                    self.state = ModemState::Idle;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::test_helpers::{go_online, test_client, MockSerial, TestClient};

    fn replies(command: &str) -> &'static [&'static str] {
        match command {
            "AT" | "ATE0" | "AT+CLTS=1" | "AT+CLIP=1" | "AT+CIPMUX=1" | "AT+CIICR"
            | "AT+CNMI=2,2,0,0,0" | "AT+CMGF=1" | "AT+CSCS=\"8859-1\""
            | "AT+CSTT=\"internet\",\"\",\"\"" => &["OK"],
            "AT+CSQ" => &["+CSQ: 17,0", "OK"],
            "AT+CBC" => &["+CBC: 0,80,4000", "OK"],
            "AT+CREG?" => &["+CREG: 0,1", "OK"],
            "AT+CIPMUX?" => &["+CIPMUX: 0", "OK"],
            "AT+CNMI?" => &["+CNMI: 2,1,0,0,0", "OK"],
            "AT+CMGF?" => &["+CMGF: 0", "OK"],
            "AT+CCLK?" => &["+CCLK: \"24/01/02,03:04:05+00\"", "OK"],
            "AT+CIPSHUT" => &["SHUT OK"],
            "AT+CIFSR" => &["10.222.111.99"],
            other => panic!("no canned reply for [{other}]"),
        }
    }

    /// Runs process passes, answering every issued command from the
    /// canned table, until a pass issues nothing.
    fn drive(client: &mut TestClient, serial: &MockSerial, limit: usize) -> Vec<String> {
        let mut issued = Vec::new();
        for _ in 0..limit {
            client.process().unwrap();
            let tx = serial.take_tx();
            if tx.is_empty() {
                return issued;
            }
            let line = core::str::from_utf8(&tx).unwrap().trim_end().to_string();
            for reply in replies(&line) {
                serial.inject_line(reply);
            }
            issued.push(line);
        }
        panic!("bring-up did not settle within {limit} passes");
    }

    #[test]
    fn bring_up_follows_the_priority_order() {
        let (mut client, serial, _timer) = test_client();
        client.enable_gprs();

        let issued = drive(&mut client, &serial, 32);
        assert_eq!(
            issued,
            [
                "AT",
                "ATE0",
                "AT+CSQ",
                "AT+CBC",
                "AT+CREG?",
                "AT+CLTS=1",
                "AT+CLIP=1",
                "AT+CIPMUX?",
                "AT+CIPMUX=1",
                "AT+CIPSHUT",
                "AT+CSTT=\"internet\",\"\",\"\"",
                "AT+CNMI?",
                "AT+CNMI=2,2,0,0,0",
                "AT+CMGF?",
                "AT+CMGF=1",
                "AT+CSCS=\"8859-1\"",
                "AT+CCLK?",
                "AT+CIICR",
                "AT+CIFSR",
            ]
        );

        assert!(client.is_registered());
        assert!(client.gprs_active());
        assert_eq!(client.local_ip(), Some("10.222.111.99"));
        assert_eq!(client.current_time(), Some(1_704_164_645));
        assert!(client.is_modem_idle());
    }

    #[test]
    fn at_most_one_command_is_outstanding() {
        let (mut client, serial, _timer) = test_client();
        client.process().unwrap();
        client.process().unwrap();
        client.process().unwrap();
        // no reply arrived, so nothing beyond the first AT went out
        assert_eq!(serial.take_tx(), b"AT\r\n");
    }

    #[test]
    fn registration_gates_everything_behind_it() {
        let (mut client, serial, timer) = test_client();
        go_online(&mut client);
        client.registration = crate::registration::RegistrationStatus::Searching;
        client.last_registration_poll = Some(client.timer.now());

        // gate holds: no registration, nothing due, nothing issued
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");

        timer.advance(59_000);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");

        timer.advance(1_000);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CREG?\r\n");

        serial.inject_line("+CREG: 0,1");
        serial.inject_line("OK");
        client.process().unwrap();
        assert!(client.is_registered());
    }

    #[test]
    fn polls_refire_after_their_period() {
        let (mut client, serial, timer) = test_client();
        go_online(&mut client);

        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");

        timer.advance(90_000);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CSQ\r\n");

        // the stamp was taken at issue, not at the reply
        serial.inject_line("+CSQ: 20,0");
        serial.inject_line("OK");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"");
    }

    #[test]
    fn power_save_is_reconciled_both_ways() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);

        client.enable_power_save();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CSCLK=2\r\n");
        serial.inject_line("OK");
        client.process().unwrap();
        assert!(client.power_save_active);

        client.disable_power_save();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CSCLK=0\r\n");
        serial.inject_line("OK");
        client.process().unwrap();
        assert!(!client.power_save_active);
    }

    #[test]
    fn send_length_is_frozen_when_the_command_is_issued() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.connections[0].observed = ConnectionState::ConnectOk;

        assert_eq!(client.write_data(0, b"hello world").unwrap(), 11);
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSEND=0,11\r\n");

        // late arrivals do not stretch the in-flight send
        assert_eq!(client.write_data(0, b"!!!").unwrap(), 3);
        serial.inject(b"> ");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"hello world");
        assert_eq!(client.pending_outbound(0), 3);

        serial.inject_line("0, SEND OK");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSEND=0,3\r\n");
    }

    #[test]
    fn disabling_gprs_shuts_the_bearer_down() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);

        client.disable_gprs();
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CIPSHUT\r\n");

        serial.inject_line("SHUT OK");
        client.process().unwrap();
        assert_eq!(client.gprs_state, GprsState::IpInitial);
        // disabled and at rest: the attach rule stays quiet
        assert_eq!(serial.take_tx(), b"");
    }

    #[test]
    fn queued_sms_is_scheduled_after_connection_work() {
        let (mut client, serial, _timer) = test_client();
        go_online(&mut client);
        client.send_message("+15551234567", "Hi").unwrap();
        client.connect(0, crate::connection::Protocol::Tcp, "93.184.216.34", 80).unwrap();

        client.process().unwrap();
        assert_eq!(
            serial.take_tx(),
            b"AT+CIPSTART=0,\"TCP\",\"93.184.216.34\",80\r\n"
        );
        serial.inject_line("0, CONNECT OK");
        client.process().unwrap();
        assert_eq!(serial.take_tx(), b"AT+CMGS=\"+15551234567\"\r\n");
    }
}
