//! Network registration state reported by +CREG.

/// Registration state of the module on the GSM network.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationStatus {
    #[default]
    Unknown,
    Searching,
    Registered,
}

impl RegistrationStatus {
    pub fn registered(&self) -> bool {
        matches!(self, Self::Registered)
    }
}

impl From<u8> for RegistrationStatus {
    /// Maps the `<stat>` code of a `+CREG:` reply. Roaming counts as
    /// registered; denied and out-of-coverage stay unknown and keep the
    /// registration poll alive.
    fn from(v: u8) -> Self {
        match v {
            1 | 5 => Self::Registered,
            2 => Self::Searching,
            _ => Self::Unknown,
        }
    }
}
