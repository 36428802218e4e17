use core::fmt;
use serde::{Deserialize, Serialize};

/// Whole seconds since the Unix epoch.
pub type Epoch = i64;

pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Synthesizer output frequency, stored in hundredths of a hertz.
///
/// The tone spacing of the protocol (12000/8192 Hz) is not a whole number of
/// hertz, so every value handed to the synthesizer carries two decimals.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Frequency(u64);

impl Frequency {
    #[must_use]
    pub const fn from_hz(hz: u64) -> Self {
        Self(hz * 100)
    }

    #[must_use]
    pub const fn from_centihertz(centihertz: u64) -> Self {
        Self(centihertz)
    }

    /// Whole hertz, truncated.
    #[must_use]
    pub const fn hz(self) -> u64 {
        self.0 / 100
    }

    #[must_use]
    pub const fn centihertz(self) -> u64 {
        self.0
    }

    /// Offset this frequency by `steps` multiples of `spacing`.
    #[must_use]
    pub const fn offset_by(self, spacing: Frequency, steps: u8) -> Self {
        Self(self.0 + spacing.0 * steps as u64)
    }
}

impl fmt::Debug for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frequency({}.{:02} Hz)", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", group_digits(self.hz()))
    }
}

/// Insert a dot every three digits from the right: `14097100` -> `14.097.100`.
#[must_use]
pub fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

/// UTC hour, minute and second of an epoch.
#[must_use]
pub fn time_of_day(epoch: Epoch) -> (u8, u8, u8) {
    let secs = epoch.rem_euclid(SECONDS_PER_DAY);
    (
        (secs / SECONDS_PER_HOUR) as u8,
        ((secs % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE) as u8,
        (secs % SECONDS_PER_MINUTE) as u8,
    )
}

/// `HH:MM:SS` in UTC.
#[must_use]
pub fn format_hhmmss(epoch: Epoch) -> String {
    let (h, m, s) = time_of_day(epoch);
    format!("{h:02}:{m:02}:{s:02}")
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
#[must_use]
pub fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Epoch for a UTC calendar date and time.
#[must_use]
pub fn epoch_from_utc(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Epoch {
    days_from_civil(year, month, day) * SECONDS_PER_DAY
        + i64::from(hour) * SECONDS_PER_HOUR
        + i64::from(minute) * SECONDS_PER_MINUTE
        + i64::from(second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_digits() {
        assert_eq!(group_digits(14_097_100), "14.097.100");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1000), "1.000");
        assert_eq!(group_digits(0), "0");
    }

    #[test]
    fn test_frequency_display_and_offset() {
        let base = Frequency::from_hz(14_097_100);
        assert_eq!(base.to_string(), "14.097.100 Hz");

        let tone = base.offset_by(Frequency::from_centihertz(146), 3);
        assert_eq!(tone.centihertz(), 1_409_710_000 + 438);
        assert_eq!(tone.hz(), 14_097_104);
    }

    #[test]
    fn test_epoch_from_utc() {
        assert_eq!(epoch_from_utc(1970, 1, 1, 0, 0, 0), 0);
        assert_eq!(epoch_from_utc(2000, 3, 1, 0, 0, 0), 951_868_800);
        assert_eq!(epoch_from_utc(2024, 2, 29, 12, 1, 30), 1_709_208_090);
    }

    #[test]
    fn test_time_of_day() {
        let epoch = epoch_from_utc(2024, 5, 17, 12, 59, 10);
        assert_eq!(time_of_day(epoch), (12, 59, 10));
        assert_eq!(format_hhmmss(epoch), "12:59:10");
    }
}
