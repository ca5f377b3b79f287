//! Postgres `interval`.
use std::fmt;

use crate::{
    encode::Encode,
    row::{Decode, DecodeError},
    types::Value,
};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// Postgres time interval.
///
/// Each component is kept separately, `1 mon` is never normalized into days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    pub const fn new(months: i32, days: i32, microseconds: i64) -> Interval {
        Interval { months, days, microseconds }
    }

    /// Parse the `postgres` interval style output.
    ///
    /// ```text
    /// 1 year 2 mons -3 days +04:05:06.000007
    /// ```
    pub(crate) fn parse(s: &str) -> Result<Interval, DecodeError> {
        let mut interval = Interval::default();
        let mut words = s.split_whitespace().peekable();

        while let Some(word) = words.next() {
            if word.contains(':') {
                interval.microseconds = interval
                    .microseconds
                    .checked_add(parse_clock(word)?)
                    .ok_or_else(|| DecodeError::malformed("interval out of range"))?;
                continue;
            }

            let n = word
                .parse::<i32>()
                .map_err(|_| DecodeError::malformed("invalid interval quantity"))?;
            let Some(unit) = words.next() else {
                return Err(DecodeError::malformed("interval quantity missing unit"));
            };
            let overflow = || DecodeError::malformed("interval out of range");
            match unit.trim_end_matches('s') {
                "year" => {
                    let months = n.checked_mul(12).ok_or_else(overflow)?;
                    interval.months = interval.months.checked_add(months).ok_or_else(overflow)?;
                }
                "mon" => interval.months = interval.months.checked_add(n).ok_or_else(overflow)?,
                "day" => interval.days = interval.days.checked_add(n).ok_or_else(overflow)?,
                _ => return Err(DecodeError::malformed("unknown interval unit")),
            }
        }

        Ok(interval)
    }
}

/// `[-+]HH:MM:SS[.ffffff]` into microseconds
fn parse_clock(word: &str) -> Result<i64, DecodeError> {
    let err = || DecodeError::malformed("invalid interval time");
    let (negative, word) = match word.as_bytes().first() {
        Some(b'-') => (true, &word[1..]),
        Some(b'+') => (false, &word[1..]),
        _ => (false, word),
    };
    let mut parts = word.splitn(3, ':');
    let hours = parts.next().and_then(|e| e.parse::<i64>().ok()).ok_or_else(err)?;
    let minutes = parts.next().and_then(|e| e.parse::<i64>().ok()).ok_or_else(err)?;
    let (secs, frac) = match parts.next() {
        Some(secs) => secs.split_once('.').unwrap_or((secs, "")),
        None => ("0", ""),
    };
    let secs = secs.parse::<i64>().map_err(|_| err())?;
    let micros = match frac {
        "" => 0,
        frac if frac.len() <= 6 && frac.bytes().all(|e| e.is_ascii_digit()) => {
            format!("{frac:0<6}").parse::<i64>().map_err(|_| err())?
        }
        _ => return Err(err()),
    };
    let total = hours
        .checked_mul(MICROS_PER_HOUR)
        .and_then(|e| e.checked_add(minutes * MICROS_PER_MINUTE))
        .and_then(|e| e.checked_add(secs * MICROS_PER_SECOND + micros))
        .ok_or_else(err)?;
    Ok(if negative { -total } else { total })
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn unit(f: &mut fmt::Formatter<'_>, n: i32, name: &str) -> fmt::Result {
            let plural = if n == 1 { "" } else { "s" };
            write!(f, "{n} {name}{plural} ")
        }

        let years = self.months / 12;
        let months = self.months % 12;
        if years != 0 {
            unit(f, years, "year")?;
        }
        if months != 0 {
            unit(f, months, "mon")?;
        }
        if self.days != 0 {
            unit(f, self.days, "day")?;
        }

        let sign = if self.microseconds < 0 { "-" } else { "" };
        let micros = self.microseconds.unsigned_abs();
        let hours = micros / MICROS_PER_HOUR as u64;
        let minutes = micros % MICROS_PER_HOUR as u64 / MICROS_PER_MINUTE as u64;
        let seconds = micros % MICROS_PER_MINUTE as u64 / MICROS_PER_SECOND as u64;
        let frac = micros % MICROS_PER_SECOND as u64;
        write!(f, "{sign}{hours:02}:{minutes:02}:{seconds:02}")?;
        if frac != 0 {
            write!(f, ".{frac:06}")?;
        }
        Ok(())
    }
}

impl Encode for Interval {
    fn encode(self) -> Value {
        Value::Interval(self)
    }
}

impl Decode for Interval {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Interval(v) => Ok(v),
            other => Err(DecodeError::mismatch("interval", &other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn components_are_independent() {
        let i = Interval::parse("10 years 3 mons").unwrap();
        assert_eq!(i, Interval::new(123, 0, 0));

        let i = Interval::parse("1 year -2 mons +3 days -04:05:06.5").unwrap();
        assert_eq!(i.months, 10);
        assert_eq!(i.days, 3);
        assert_eq!(i.microseconds, -(4 * MICROS_PER_HOUR + 5 * MICROS_PER_MINUTE + 6_500_000));
    }

    #[test]
    fn display_reparses() {
        let i = Interval::new(-14, 1, 90 * MICROS_PER_MINUTE + 7);
        assert_eq!(i.to_string(), "-1 years -2 mons 1 day 01:30:00.000007");
        assert_eq!(Interval::parse(&i.to_string()).unwrap(), i);
        assert_eq!(Interval::default().to_string(), "00:00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Interval::parse("3 fortnights").is_err());
        assert!(Interval::parse("3").is_err());
        assert!(Interval::parse("aa:bb").is_err());
    }
}
