//! Time source trait and modem timestamp parsing.

use fugit::TimerInstantU32;

/// A monotonic clock with a tick rate of `TIMER_HZ` ticks per second.
///
/// The driver only ever samples the current instant and does arithmetic on
/// the side, so a single method is enough. Any hardware timer, RTOS tick
/// or `std::time::Instant` wrapper that counts up will do.
pub trait Clock<const TIMER_HZ: u32> {
    /// Current instant. Must never move backwards between calls.
    fn now(&mut self) -> TimerInstantU32<TIMER_HZ>;
}

const SECS_PER_MIN: u32 = 60;
const SECS_PER_HOUR: u32 = 3_600;
const SECS_PER_DAY: u32 = 86_400;

const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap_year(year: u32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn two_digits(bytes: &[u8], at: usize) -> Option<u32> {
    let hi = bytes.get(at)?.wrapping_sub(b'0');
    let lo = bytes.get(at + 1)?.wrapping_sub(b'0');
    if hi > 9 || lo > 9 {
        return None;
    }
    Some(u32::from(hi) * 10 + u32::from(lo))
}

/// Parses the network timestamp format used by +CCLK and +CMT headers,
/// `"yy/MM/dd,hh:mm:ss±zz"`, into epoch seconds.
///
/// Two-digit years are interpreted as 20yy. The zone suffix is reported in
/// quarter hours by the modem and is ignored here; the caller gets the
/// timestamp in the zone the network operates in.
pub(crate) fn parse_timestamp(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    if bytes.len() < 17
        || bytes[2] != b'/'
        || bytes[5] != b'/'
        || bytes[8] != b','
        || bytes[11] != b':'
        || bytes[14] != b':'
    {
        return None;
    }

    let year = 2000 + two_digits(bytes, 0)?;
    let month = two_digits(bytes, 3)?;
    let day = two_digits(bytes, 6)?;
    let hour = two_digits(bytes, 9)?;
    let minute = two_digits(bytes, 12)?;
    let second = two_digits(bytes, 15)?;

    if !(1..=12).contains(&month) || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let leap = is_leap_year(year);
    let month_len = if month == 2 && leap {
        29
    } else {
        DAYS_IN_MONTH[(month - 1) as usize]
    };
    if day == 0 || day > month_len {
        return None;
    }

    let mut days = 0;
    for y in 1970..year {
        days += if is_leap_year(y) { 366 } else { 365 };
    }
    for m in 1..month {
        days += if m == 2 && leap {
            29
        } else {
            DAYS_IN_MONTH[(m - 1) as usize]
        };
    }
    days += day - 1;

    Some(days * SECS_PER_DAY + hour * SECS_PER_HOUR + minute * SECS_PER_MIN + second)
}
