//! Power key sequencing and supply state tracking.
//!
//! The module toggles between on and off with one long press of its
//! power key. The sequencer holds the key, releases it after the hold
//! time, then reads the status line to learn whether the press took.

use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::{Read, ReadReady, Write};
use fugit::TimerInstantU32;

use crate::client::GsmClient;
use crate::clock::Clock;
use crate::error::Error;
use crate::module_timing::pwrkey_pulse_time;

/// Module supply state as tracked from the power key and status pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Off,
    /// Power key held to switch the module on.
    Starting,
    /// Power key held to switch the module off.
    Stopping,
    On,
}

impl<S, CLK, PWR, STAT, const TIMER_HZ: u32, const N: usize, const L: usize>
    GsmClient<S, CLK, PWR, STAT, TIMER_HZ, N, L>
where
    S: Read + ReadReady + Write,
    CLK: Clock<TIMER_HZ>,
    PWR: OutputPin,
    STAT: InputPin,
{
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Sets the wanted supply state. The key presses happen over later
    /// [`GsmClient::process`] calls; a press already in flight finishes
    /// first.
    pub fn set_power(&mut self, on: bool) {
        self.desired_power = on;
    }

    pub(crate) fn drive_power(&mut self, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        if self.config.pwr_pin.is_none() {
            return Ok(());
        }
        if let Some(started) = self.pulse_started {
            let held_long_enough = now
                .checked_duration_since(started)
                .map(|held| held >= pwrkey_pulse_time::<TIMER_HZ>())
                .unwrap_or(false);
            if held_long_enough {
                self.finish_pulse()?;
            }
            return Ok(());
        }
        match (self.power_state, self.desired_power) {
            (PowerState::Off, true) => {
                info!("Powering the module on");
                self.power_state = PowerState::Starting;
                self.begin_pulse(now)
            }
            (PowerState::On, false) => {
                info!("Powering the module off");
                self.power_state = PowerState::Stopping;
                self.begin_pulse(now)
            }
            _ => Ok(()),
        }
    }

    fn begin_pulse(&mut self, now: TimerInstantU32<TIMER_HZ>) -> Result<(), Error> {
        if let Some(pin) = self.config.pwr_pin.as_mut() {
            pin.set_high().map_err(|_| Error::IoPin)?;
        }
        self.pulse_started = Some(now);
        Ok(())
    }

    /// Releases the key and settles on the state the status pin reports.
    /// A press that did not take falls back to the previous stable state,
    /// so the next [`GsmClient::drive_power`] presses again.
    fn finish_pulse(&mut self) -> Result<(), Error> {
        if let Some(pin) = self.config.pwr_pin.as_mut() {
            pin.set_low().map_err(|_| Error::IoPin)?;
        }
        self.pulse_started = None;

        let module_on = match self.config.status_pin.as_mut() {
            Some(pin) => pin.is_high().map_err(|_| Error::IoPin)?,
            // no status line to read: take the press at its word
            None => self.power_state == PowerState::Starting,
        };

        match (self.power_state, module_on) {
            (PowerState::Starting, true) => {
                info!("Module is on");
                self.power_state = PowerState::On;
            }
            (PowerState::Starting, false) => {
                warn!("Module did not switch on");
                self.power_state = PowerState::Off;
            }
            (PowerState::Stopping, false) => {
                info!("Module is off");
                self.power_state = PowerState::Off;
                self.reset_modem_state();
            }
            (PowerState::Stopping, true) => {
                warn!("Module did not switch off");
                self.power_state = PowerState::On;
            }
            _ => {}
        }
        Ok(())
    }
}
