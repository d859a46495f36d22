#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GenericError {
    Timeout,
    Clock,
    Unsupported,
}

/// Driver errors surfaced through the public API.
///
/// Protocol-level failures are not errors here: a rejected or timed-out
/// command leaves the session in an advisory state that the scheduler
/// recovers from on later polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Reading from or writing to the serial transport failed.
    Serial,
    /// Driving the power key or sampling the status pin failed.
    IoPin,
    /// Connection index outside the configured slot range.
    InvalidConnection,
    /// An argument did not fit its fixed-capacity buffer.
    Overflow,
    /// Generic error
    Generic(GenericError),
}

impl From<GenericError> for Error {
    fn from(e: GenericError) -> Self {
        Self::Generic(e)
    }
}
