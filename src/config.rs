//! Driver configuration and placeholder pins.

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use heapless::String;

/// Longest access point name accepted by [`Config::with_apn`].
pub const MAX_APN_LEN: usize = 30;

/// Placeholder for device pins that are not connected.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl InputPin for NoPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Static configuration handed to the client at construction.
///
/// `PWR` is the output driving the module's power key, `STAT` the input
/// wired to its status line. Both are optional; without a power key the
/// module is assumed to be powered externally and always on.
pub struct Config<PWR, STAT> {
    pub(crate) pwr_pin: Option<PWR>,
    pub(crate) status_pin: Option<STAT>,
    pub(crate) apn: String<MAX_APN_LEN>,
}

impl Default for Config<NoPin, NoPin> {
    fn default() -> Self {
        Self::new()
    }
}

impl<PWR, STAT> Config<PWR, STAT>
where
    PWR: OutputPin,
    STAT: InputPin,
{
    pub fn new() -> Self {
        Config {
            pwr_pin: None,
            status_pin: None,
            apn: default_apn(),
        }
    }

    pub fn with_pwr(self, pwr_pin: PWR) -> Self {
        Config {
            pwr_pin: Some(pwr_pin),
            ..self
        }
    }

    pub fn with_status(self, status_pin: STAT) -> Self {
        Config {
            status_pin: Some(status_pin),
            ..self
        }
    }

    /// Access point name used when attaching the GPRS bearer.
    ///
    /// Silently truncated to [`MAX_APN_LEN`] characters.
    pub fn with_apn(mut self, apn: &str) -> Self {
        self.apn.clear();
        for c in apn.chars() {
            if self.apn.push(c).is_err() {
                break;
            }
        }
        self
    }
}

fn default_apn() -> String<MAX_APN_LEN> {
    let mut apn = String::new();
    apn.push_str("internet").ok();
    apn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apn_defaults_and_truncates() {
        let config: Config<NoPin, NoPin> = Config::new();
        assert_eq!(config.apn.as_str(), "internet");

        let config = config.with_apn("m2m.operator.example");
        assert_eq!(config.apn.as_str(), "m2m.operator.example");

        let config = config.with_apn("an.apn.that.is.way.longer.than.the.buffer.allows");
        assert_eq!(config.apn.len(), MAX_APN_LEN);
    }
}
