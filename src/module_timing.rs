//! Timing budgets of the module, shared by the power sequencer and the
//! command scheduler.

use fugit::TimerDurationU32;

/// Hold time of the power key to toggle the module on or off.
pub fn pwrkey_pulse_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::millis(3000)
}

/// How long to wait for the body line of a two-line unsolicited message
/// before abandoning the cascade.
pub fn urc_body_time<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::secs(5)
}

/// Interval between unprompted signal quality polls.
pub fn signal_poll_period<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::secs(90)
}

/// Interval between unprompted battery charge polls.
pub fn battery_poll_period<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::secs(120)
}

/// Interval between network clock samples.
pub fn clock_poll_period<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::secs(120)
}

/// Interval between registration queries while not yet registered.
pub fn registration_poll_period<const TIMER_HZ: u32>() -> TimerDurationU32<TIMER_HZ> {
    TimerDurationU32::<TIMER_HZ>::secs(60)
}
