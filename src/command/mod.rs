//! AT commands for the SIM800 series module family, following the
//! "SIM800 Series AT Command Manual" and its TCP/IP application notes.

use core::fmt::Write;

use heapless::String;

use crate::config::MAX_APN_LEN;
use crate::connection::{Protocol, MAX_ADDRESS_LEN};
use crate::sms::MAX_MSISDN_LEN;

pub mod types;

/// Longest command line the driver ever writes, terminator excluded.
pub(crate) const MAX_COMMAND_LEN: usize = 64;

/// Message delivery routing written with AT+CNMI: route received
/// messages straight to the serial link as +CMT cascades.
pub(crate) const SMS_NOTIFY_SETTINGS: &str = "2,2,0,0,0";

/// Character set written with AT+CSCS.
pub(crate) const CHARACTER_SET: &str = "8859-1";

/// Every command the scheduler can put on the wire.
///
/// The variant doubles as the tag identifying the outstanding exchange
/// while its reply is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Autobauding handshake.
    At,
    /// ATE0, stop the modem echoing our command lines.
    EchoOff,
    /// ATA, answer an incoming call.
    AnswerCall,
    /// AT+CBC, battery charge query.
    QueryBattery,
    /// AT+CSQ, signal quality query.
    QuerySignal,
    /// AT+CREG?, network registration query.
    QueryRegistration,
    /// AT+CSCLK, slow-clock (power save) control.
    SetPowerSave { enable: bool },
    /// AT+CLTS=1, enable network time sync.
    EnableTimeSync,
    /// AT+CLIP=1, enable calling line identification.
    EnableCallerId,
    /// AT+CIPMUX?, multi-connection mode query.
    QueryMux,
    /// AT+CIPMUX=1, enable multi-connection mode.
    WriteMux,
    /// AT+CIPSHUT, deactivate the GPRS PDP context.
    ShutBearer,
    /// AT+CSTT, set the APN ahead of bearer activation.
    AttachApn { apn: String<MAX_APN_LEN> },
    /// AT+CNMI?, message routing query.
    QuerySmsNotify,
    /// AT+CNMI, route deliveries to the serial link.
    WriteSmsNotify,
    /// AT+CMGF?, message format query.
    QuerySmsMode,
    /// AT+CMGF=1, select text mode.
    WriteSmsMode,
    /// AT+CSCS, select the character set.
    WriteCharSet,
    /// AT+CCLK?, network clock query.
    QueryClock,
    /// AT+CIICR, bring up the wireless connection.
    ActivateBearer,
    /// AT+CIFSR, get the local IP address.
    QueryLocalIp,
    /// AT+CIPSTART, open a TCP or UDP connection on a slot.
    OpenConnection {
        connection: usize,
        protocol: Protocol,
        address: String<MAX_ADDRESS_LEN>,
        port: u16,
    },
    /// AT+CIPSEND, announce a data write; the payload follows the prompt.
    SendData { connection: usize, length: usize },
    /// AT+CIPCLOSE, close a connection.
    CloseConnection { connection: usize },
    /// AT+CMGS, send a message; the body follows the prompt.
    SendSms { msisdn: String<MAX_MSISDN_LEN> },
}

impl Command {
    pub fn get_cmd(&self) -> String<MAX_COMMAND_LEN> {
        let mut buffer = String::new();
        match self {
            Command::At => {
                buffer.push_str("AT").ok();
            }
            Command::EchoOff => {
                buffer.push_str("ATE0").ok();
            }
            Command::AnswerCall => {
                buffer.push_str("ATA").ok();
            }
            Command::QueryBattery => {
                buffer.push_str("AT+CBC").ok();
            }
            Command::QuerySignal => {
                buffer.push_str("AT+CSQ").ok();
            }
            Command::QueryRegistration => {
                buffer.push_str("AT+CREG?").ok();
            }
            Command::SetPowerSave { enable } => {
                // mode 2 lets the module sleep whenever DTR and the
                // serial link are quiet, mode 0 keeps it awake
                write!(buffer, "AT+CSCLK={}", if *enable { 2 } else { 0 }).ok();
            }
            Command::EnableTimeSync => {
                buffer.push_str("AT+CLTS=1").ok();
            }
            Command::EnableCallerId => {
                buffer.push_str("AT+CLIP=1").ok();
            }
            Command::QueryMux => {
                buffer.push_str("AT+CIPMUX?").ok();
            }
            Command::WriteMux => {
                buffer.push_str("AT+CIPMUX=1").ok();
            }
            Command::ShutBearer => {
                buffer.push_str("AT+CIPSHUT").ok();
            }
            Command::AttachApn { apn } => {
                write!(buffer, "AT+CSTT=\"{}\",\"\",\"\"", apn).ok();
            }
            Command::QuerySmsNotify => {
                buffer.push_str("AT+CNMI?").ok();
            }
            Command::WriteSmsNotify => {
                write!(buffer, "AT+CNMI={}", SMS_NOTIFY_SETTINGS).ok();
            }
            Command::QuerySmsMode => {
                buffer.push_str("AT+CMGF?").ok();
            }
            Command::WriteSmsMode => {
                buffer.push_str("AT+CMGF=1").ok();
            }
            Command::WriteCharSet => {
                write!(buffer, "AT+CSCS=\"{}\"", CHARACTER_SET).ok();
            }
            Command::QueryClock => {
                buffer.push_str("AT+CCLK?").ok();
            }
            Command::ActivateBearer => {
                buffer.push_str("AT+CIICR").ok();
            }
            Command::QueryLocalIp => {
                buffer.push_str("AT+CIFSR").ok();
            }
            Command::OpenConnection {
                connection,
                protocol,
                address,
                port,
            } => {
                write!(
                    buffer,
                    "AT+CIPSTART={},\"{}\",\"{}\",{}",
                    connection,
                    protocol.as_str(),
                    address,
                    port
                )
                .ok();
            }
            Command::SendData { connection, length } => {
                write!(buffer, "AT+CIPSEND={},{}", connection, length).ok();
            }
            Command::CloseConnection { connection } => {
                write!(buffer, "AT+CIPCLOSE={}", connection).ok();
            }
            Command::SendSms { msisdn } => {
                write!(buffer, "AT+CMGS=\"{}\"", msisdn).ok();
            }
        }
        buffer
    }

    /// Reply deadline. The slow end covers what the manual allows for
    /// bearer activation and data sends; past it the exchange is
    /// abandoned and the session returns to idle.
    pub fn max_timeout_ms(&self) -> u32 {
        match self {
            Command::At | Command::EchoOff => 2_000,
            Command::ShutBearer => 65_000,
            Command::OpenConnection { .. } => 75_000,
            Command::ActivateBearer | Command::SendData { .. } => 120_000,
            Command::CloseConnection { .. } => 15_000,
            Command::SendSms { .. } => 60_000,
            _ => 5_000,
        }
    }
}
