//! Temporal types, integration with the [`time`][::time] crate.
//!
//! Postgres counts from `2000-01-01 00:00:00`. `infinity` and `-infinity`
//! maps to the `MAX` and `MIN` value of the corresponding type.
use bytes::{Buf, BufMut, Bytes};
use ::time::{
    Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
    format_description::BorrowedFormatItem,
    macros::{date, format_description},
};

use crate::{
    encode::Encode,
    row::{Decode, DecodeError},
    types::Value,
};

const PG_EPOCH_DATE: Date = date!(2000-01-01);
const PG_EPOCH: PrimitiveDateTime = PrimitiveDateTime::new(PG_EPOCH_DATE, Time::MIDNIGHT);
/// `24:00:00` in postgres
const END_OF_DAY: Time = ::time::macros::time!(23:59:59.999_999);

const DATE: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
const TIME_PARSE: &[BorrowedFormatItem<'_>] =
    format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]");
const TIME_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:6]");
const OFFSET_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]:[offset_second]");

fn truncated() -> DecodeError {
    DecodeError::malformed("temporal value truncated")
}

fn out_of_range() -> DecodeError {
    DecodeError::malformed("temporal value out of range")
}

// ===== Binary =====

pub(crate) fn date_from_binary(mut value: Bytes) -> Result<Date, DecodeError> {
    if value.remaining() != 4 {
        return Err(truncated());
    }
    match value.get_i32() {
        i32::MAX => Ok(Date::MAX),
        i32::MIN => Ok(Date::MIN),
        days => PG_EPOCH_DATE
            .checked_add(Duration::days(days as i64))
            .ok_or_else(out_of_range),
    }
}

pub(crate) fn date_to_binary(date: Date, buf: &mut impl BufMut) {
    let days = match date {
        d if d == Date::MAX => i32::MAX,
        d if d == Date::MIN => i32::MIN,
        date => (date - PG_EPOCH_DATE).whole_days() as i32,
    };
    buf.put_i32(days);
}

fn time_from_micros(micros: i64) -> Result<Time, DecodeError> {
    // `24:00:00` is a valid postgres time
    if micros >= 86_400_000_000 {
        return Ok(END_OF_DAY);
    }
    let micros = u64::try_from(micros).map_err(|_| out_of_range())?;
    Time::from_hms_micro(
        (micros / 3_600_000_000) as u8,
        (micros / 60_000_000 % 60) as u8,
        (micros / 1_000_000 % 60) as u8,
        (micros % 1_000_000) as u32,
    )
    .map_err(|_| out_of_range())
}

fn time_to_micros(time: Time) -> i64 {
    (time - Time::MIDNIGHT).whole_microseconds() as i64
}

pub(crate) fn time_from_binary(mut value: Bytes) -> Result<Time, DecodeError> {
    if value.remaining() != 8 {
        return Err(truncated());
    }
    time_from_micros(value.get_i64())
}

pub(crate) fn time_to_binary(time: Time, buf: &mut impl BufMut) {
    buf.put_i64(time_to_micros(time));
}

pub(crate) fn timetz_from_binary(mut value: Bytes) -> Result<(Time, UtcOffset), DecodeError> {
    if value.remaining() != 12 {
        return Err(truncated());
    }
    let time = time_from_micros(value.get_i64())?;
    // seconds west of UTC
    let zone = value.get_i32();
    let offset = UtcOffset::from_whole_seconds(-zone).map_err(|_| out_of_range())?;
    Ok((time, offset))
}

pub(crate) fn timetz_to_binary(time: Time, offset: UtcOffset, buf: &mut impl BufMut) {
    buf.put_i64(time_to_micros(time));
    buf.put_i32(-offset.whole_seconds());
}

pub(crate) fn timestamp_from_binary(mut value: Bytes) -> Result<PrimitiveDateTime, DecodeError> {
    if value.remaining() != 8 {
        return Err(truncated());
    }
    match value.get_i64() {
        i64::MAX => Ok(PrimitiveDateTime::MAX),
        i64::MIN => Ok(PrimitiveDateTime::MIN),
        micros => PG_EPOCH
            .checked_add(Duration::microseconds(micros))
            .ok_or_else(out_of_range),
    }
}

pub(crate) fn timestamp_to_binary(ts: PrimitiveDateTime, buf: &mut impl BufMut) {
    let micros = match ts {
        ts if ts == PrimitiveDateTime::MAX => i64::MAX,
        ts if ts == PrimitiveDateTime::MIN => i64::MIN,
        ts => (ts - PG_EPOCH).whole_microseconds() as i64,
    };
    buf.put_i64(micros);
}

pub(crate) fn timestamptz_from_binary(value: Bytes) -> Result<OffsetDateTime, DecodeError> {
    timestamp_from_binary(value).map(PrimitiveDateTime::assume_utc)
}

/// Offsets are kept as is, the utc value may not be representable.
pub(crate) fn timestamptz_to_binary(ts: OffsetDateTime, buf: &mut impl BufMut) {
    let micros = match ts {
        ts if ts == PrimitiveDateTime::MAX.assume_utc() => i64::MAX,
        ts if ts == PrimitiveDateTime::MIN.assume_utc() => i64::MIN,
        ts => (ts - PG_EPOCH.assume_utc()).whole_microseconds() as i64,
    };
    buf.put_i64(micros);
}

// ===== Text =====

pub(crate) fn date_from_text(s: &str) -> Result<Date, DecodeError> {
    match s {
        "infinity" => return Ok(Date::MAX),
        "-infinity" => return Ok(Date::MIN),
        _ => {}
    }
    let (s, bc) = match s.strip_suffix(" BC") {
        Some(s) => (s, true),
        None => (s, false),
    };
    let date = Date::parse(s, DATE).map_err(|_| DecodeError::malformed("invalid date"))?;
    match bc {
        // 1 BC is year 0
        true => date.replace_year(1 - date.year()).map_err(|_| out_of_range()),
        false => Ok(date),
    }
}

/// Returns `true` if the date is before common era and written with `BC` suffix.
fn write_date(date: Date, out: &mut String) -> bool {
    let (date, bc) = match date.year() {
        year if year <= 0 => match date.replace_year(1 - year) {
            Ok(date) => (date, true),
            Err(_) => (date, false),
        },
        _ => (date, false),
    };
    if let Ok(s) = date.format(DATE) {
        out.push_str(&s);
    }
    bc
}

pub(crate) fn date_to_text(date: Date, out: &mut String) {
    match date {
        d if d == Date::MAX => out.push_str("infinity"),
        d if d == Date::MIN => out.push_str("-infinity"),
        date => {
            if write_date(date, out) {
                out.push_str(" BC");
            }
        }
    }
}

pub(crate) fn time_from_text(s: &str) -> Result<Time, DecodeError> {
    if s.starts_with("24:00:00") {
        return Ok(END_OF_DAY);
    }
    Time::parse(s, TIME_PARSE).map_err(|_| DecodeError::malformed("invalid time"))
}

pub(crate) fn time_to_text(time: Time, out: &mut String) {
    if let Ok(s) = time.format(TIME_FORMAT) {
        out.push_str(&s);
    }
}

/// `+HH[:MM[:SS]]`
fn offset_from_text(s: &str) -> Result<UtcOffset, DecodeError> {
    let err = || DecodeError::malformed("invalid time zone offset");
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1i8, &s[1..]),
        Some(b'-') => (-1i8, &s[1..]),
        _ => return Err(err()),
    };
    let mut parts = rest.split(':').map(|e| e.parse::<i8>());
    let h = parts.next().unwrap_or(Ok(0)).map_err(|_| err())?;
    let m = parts.next().unwrap_or(Ok(0)).map_err(|_| err())?;
    let s = parts.next().unwrap_or(Ok(0)).map_err(|_| err())?;
    UtcOffset::from_hms(sign * h, sign * m, sign * s).map_err(|_| err())
}

fn offset_to_text(offset: UtcOffset, out: &mut String) {
    if let Ok(s) = offset.format(OFFSET_FORMAT) {
        out.push_str(&s);
    }
}

/// Split `time+offset` at the offset sign.
fn split_offset(s: &str) -> Result<(&str, &str), DecodeError> {
    match s.rfind(['+', '-']) {
        Some(i) if i > 0 => Ok(s.split_at(i)),
        _ => Err(DecodeError::malformed("missing time zone offset")),
    }
}

pub(crate) fn timetz_from_text(s: &str) -> Result<(Time, UtcOffset), DecodeError> {
    let (time, offset) = split_offset(s)?;
    Ok((time_from_text(time)?, offset_from_text(offset)?))
}

pub(crate) fn timetz_to_text(time: Time, offset: UtcOffset, out: &mut String) {
    time_to_text(time, out);
    offset_to_text(offset, out);
}

pub(crate) fn timestamp_from_text(s: &str) -> Result<PrimitiveDateTime, DecodeError> {
    match s {
        "infinity" => return Ok(PrimitiveDateTime::MAX),
        "-infinity" => return Ok(PrimitiveDateTime::MIN),
        _ => {}
    }
    let (s, bc) = match s.strip_suffix(" BC") {
        Some(s) => (s, " BC"),
        None => (s, ""),
    };
    let Some((date, time)) = s.split_once([' ', 'T']) else {
        return Err(DecodeError::malformed("invalid timestamp"));
    };
    let date = date_from_text(&[date, bc].concat())?;
    Ok(PrimitiveDateTime::new(date, time_from_text(time)?))
}

pub(crate) fn timestamp_to_text(ts: PrimitiveDateTime, out: &mut String) {
    match ts {
        ts if ts == PrimitiveDateTime::MAX => out.push_str("infinity"),
        ts if ts == PrimitiveDateTime::MIN => out.push_str("-infinity"),
        ts => {
            let bc = write_date(ts.date(), out);
            out.push(' ');
            time_to_text(ts.time(), out);
            if bc {
                out.push_str(" BC");
            }
        }
    }
}

pub(crate) fn timestamptz_from_text(s: &str) -> Result<OffsetDateTime, DecodeError> {
    match s {
        "infinity" => return Ok(PrimitiveDateTime::MAX.assume_utc()),
        "-infinity" => return Ok(PrimitiveDateTime::MIN.assume_utc()),
        _ => {}
    }
    let (s, bc) = match s.strip_suffix(" BC") {
        Some(s) => (s, " BC"),
        None => (s, ""),
    };
    let Some((date, rest)) = s.split_once([' ', 'T']) else {
        return Err(DecodeError::malformed("invalid timestamp"));
    };
    let (time, offset) = split_offset(rest)?;
    let date = date_from_text(&[date, bc].concat())?;
    Ok(PrimitiveDateTime::new(date, time_from_text(time)?).assume_offset(offset_from_text(offset)?))
}

pub(crate) fn timestamptz_to_text(ts: OffsetDateTime, out: &mut String) {
    match ts {
        ts if ts == PrimitiveDateTime::MAX.assume_utc() => out.push_str("infinity"),
        ts if ts == PrimitiveDateTime::MIN.assume_utc() => out.push_str("-infinity"),
        ts => {
            let bc = write_date(ts.date(), out);
            out.push(' ');
            time_to_text(ts.time(), out);
            offset_to_text(ts.offset(), out);
            if bc {
                out.push_str(" BC");
            }
        }
    }
}

// ===== Encode / Decode =====

macro_rules! encode {
    ($($ty:ty => $variant:ident),*) => {$(
        impl Encode for $ty {
            fn encode(self) -> Value {
                Value::$variant(self)
            }
        }
    )*};
}

encode! {
    Date => Date,
    Time => Time,
    PrimitiveDateTime => Timestamp,
    OffsetDateTime => TimestampTz
}

impl Decode for Date {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Date(v) => Ok(v),
            other => Err(DecodeError::mismatch("date", &other)),
        }
    }
}

impl Decode for Time {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Time(v) => Ok(v),
            Value::TimeTz(v, _) => Ok(v),
            other => Err(DecodeError::mismatch("time", &other)),
        }
    }
}

impl Decode for PrimitiveDateTime {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Date(v) if v == Date::MAX => Ok(PrimitiveDateTime::MAX),
            Value::Date(v) if v == Date::MIN => Ok(PrimitiveDateTime::MIN),
            Value::Date(v) => Ok(v.midnight()),
            other => Err(DecodeError::mismatch("timestamp", &other)),
        }
    }
}

impl Decode for OffsetDateTime {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::TimestampTz(v) => Ok(v),
            Value::Timestamp(v) => Ok(v.assume_utc()),
            Value::Date(v) => PrimitiveDateTime::decode_value(Value::Date(v)).map(PrimitiveDateTime::assume_utc),
            other => Err(DecodeError::mismatch("timestamptz", &other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;
    use ::time::{Month, macros::{datetime, offset, time}};

    #[test]
    fn epoch_offset() {
        let mut buf = BytesMut::new();
        date_to_binary(date!(2000-01-02), &mut buf);
        assert_eq!(&buf[..], &1i32.to_be_bytes());

        let mut buf = BytesMut::new();
        timestamp_to_binary(datetime!(1999-12-31 23:59:59), &mut buf);
        assert_eq!(&buf[..], &(-1_000_000i64).to_be_bytes());
        assert_eq!(
            timestamp_from_binary(buf.freeze()).unwrap(),
            datetime!(1999-12-31 23:59:59)
        );
    }

    #[test]
    fn infinity() {
        let inf = Bytes::copy_from_slice(&i64::MAX.to_be_bytes());
        assert_eq!(timestamp_from_binary(inf).unwrap(), PrimitiveDateTime::MAX);
        assert_eq!(date_from_text("-infinity").unwrap(), Date::MIN);

        let mut out = String::new();
        date_to_text(Date::MAX, &mut out);
        assert_eq!(out, "infinity");
    }

    #[test]
    fn text_forms() {
        let bc = Date::from_calendar_date(-43, Month::March, 15).unwrap();
        assert_eq!(date_from_text("0044-03-15 BC").unwrap(), bc);
        let mut out = String::new();
        date_to_text(bc, &mut out);
        assert_eq!(out, "0044-03-15 BC");

        assert_eq!(
            timestamp_from_text("2024-02-29 13:45:06.5").unwrap(),
            datetime!(2024-02-29 13:45:06.5)
        );
        assert_eq!(
            timestamptz_from_text("2024-02-29 13:45:06+05:30").unwrap(),
            datetime!(2024-02-29 13:45:06 +05:30)
        );
        assert_eq!(
            timetz_from_text("10:00:00-08").unwrap(),
            (time!(10:00), offset!(-8))
        );
    }

    #[test]
    fn null_is_not_a_mismatch() {
        assert!(matches!(Date::decode_value(Value::Null), Err(DecodeError::Null)));
        assert!(matches!(Time::decode_value(Value::Null), Err(DecodeError::Null)));
        assert!(matches!(PrimitiveDateTime::decode_value(Value::Null), Err(DecodeError::Null)));
        assert!(matches!(OffsetDateTime::decode_value(Value::Null), Err(DecodeError::Null)));
        assert_eq!(Option::<Date>::decode_value(Value::Null).unwrap(), None);
        assert!(matches!(
            Date::decode_value(Value::Int4(1)),
            Err(DecodeError::TypeMismatch { expected: "date", found: "int4" })
        ));
    }

    #[test]
    fn timestamptz_past_utc_range() {
        let ts = datetime!(9999-12-31 23:00 -05:00);

        let mut local = BytesMut::new();
        timestamp_to_binary(datetime!(9999-12-31 23:00), &mut local);
        let local = i64::from_be_bytes(local[..].try_into().unwrap());
        let mut buf = BytesMut::new();
        timestamptz_to_binary(ts, &mut buf);
        assert_eq!(i64::from_be_bytes(buf[..].try_into().unwrap()), local + 5 * 3600 * 1_000_000);

        let mut out = String::new();
        timestamptz_to_text(ts, &mut out);
        assert_eq!(out, "9999-12-31 23:00:00.000000-05:00:00");

        let params = crate::encode::encode_params(
            &[Value::TimestampTz(ts)],
            &[crate::postgres::oid::TIMESTAMPTZ],
        );
        assert!(params.is_ok());
    }

    #[test]
    fn timetz_zone_is_west() {
        let mut buf = BytesMut::new();
        timetz_to_binary(time!(01:00), offset!(+2), &mut buf);
        assert_eq!(&buf[8..], &(-7200i32).to_be_bytes());
        assert_eq!(timetz_from_binary(buf.freeze()).unwrap(), (time!(01:00), offset!(+2)));
    }
}
