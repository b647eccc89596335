//! DIS timestamps give the position inside the current hour, with no date and no hour. The high
//!  31 bits count units of 3600 / 2^31 seconds (about 1.676 µs) since the start of the hour,
//!  and the low bit distinguishes 'absolute' timestamps (synchronized to the host clock, bit set)
//!  from 'relative' ones (bit clear).
//!
//! Turning a timestamp back into a point in time needs a reference for the date and hour, which
//!  is passed in explicitly. The reconstruction is best-effort: if the sender's hour differs from
//!  the receiver's, the result is off by an hour, and nothing downstream should depend on it.

use chrono::{DateTime, Timelike, Utc};

pub const ABSOLUTE_TIMESTAMP_MASK: u32 = 1;

const SECONDS_PER_HOUR: f64 = 3600.0;
const UNITS_PER_HOUR: f64 = 2147483648.0; // 2^31

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisTimestamp {
    pub seconds_into_hour: f64,
    pub is_absolute: bool,
}

impl DisTimestamp {
    pub fn decode(raw: u32) -> DisTimestamp {
        DisTimestamp {
            seconds_into_hour: (raw >> 1) as f64 * SECONDS_PER_HOUR / UNITS_PER_HOUR,
            is_absolute: raw & ABSOLUTE_TIMESTAMP_MASK == 1,
        }
    }

    /// Encodes an instant's minute, second and millisecond as a DIS timestamp
    pub fn encode(instant: &DateTime<Utc>, absolute: bool) -> u32 {
        // a leap second shows up as nanos >= 1_000_000_000
        let millis = (instant.nanosecond() / 1_000_000).min(999);
        let seconds_into_hour = (instant.minute() * 60 + instant.second()) as f64 + millis as f64 / 1000.0;

        // 'as' saturates, and seconds_into_hour < 3600 keeps this below 2^31 anyway
        let units = (seconds_into_hour / SECONDS_PER_HOUR * UNITS_PER_HOUR) as u32;

        (units << 1) | if absolute { ABSOLUTE_TIMESTAMP_MASK } else { 0 }
    }

    pub fn to_approximate_instant(&self, reference_now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        to_approximate_instant(self.seconds_into_hour, reference_now)
    }
}

/// Combines the date and hour of `reference_now` with the minutes, seconds and milliseconds of
///  `seconds_into_hour`. Returns `None` if the components are out of range, which can happen
///  due to floating point effects at the top of the hour.
pub fn to_approximate_instant(seconds_into_hour: f64, reference_now: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !seconds_into_hour.is_finite() || seconds_into_hour < 0.0 {
        return None;
    }

    let minute = (seconds_into_hour / 60.0).floor();
    let second = (seconds_into_hour - minute * 60.0).floor();
    let millis = ((seconds_into_hour - seconds_into_hour.floor()) * 1000.0).floor();

    if minute >= 60.0 || !(0.0..60.0).contains(&second) || !(0.0..1000.0).contains(&millis) {
        return None;
    }

    reference_now
        .with_minute(minute as u32)?
        .with_second(second as u32)?
        .with_nanosecond(millis as u32 * 1_000_000)
}
