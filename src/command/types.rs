//! Values parsed out of command replies.

/// Most recent AT+CSQ result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalQuality {
    /// Received signal strength, 0..=31 mapping -115..-52 dBm, 99 when
    /// not known or not detectable.
    pub rssi: u8,
    /// Bit error rate as an RXQUAL band, 99 when not known.
    pub ber: u8,
}

/// Most recent AT+CBC result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    /// 0 not charging, 1 charging, 2 charge done.
    pub charge_state: u8,
    /// Remaining capacity in percent.
    pub charge_level: u8,
    /// Battery voltage in millivolts.
    pub voltage_mv: u16,
}
