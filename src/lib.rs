#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod sms;

mod client;
mod line;
mod module_timing;
mod power;
mod registration;
mod response;
mod scheduler;
mod state;

#[cfg(test)]
mod test_helpers;

pub use client::GsmClient;
pub use clock::Clock;
pub use command::types::{BatteryStatus, SignalQuality};
pub use config::{Config, NoPin};
pub use connection::{ConnectionState, Protocol};
pub use error::{Error, GenericError};
pub use power::PowerState;
pub use registration::RegistrationStatus;
pub use sms::ShortMessage;
