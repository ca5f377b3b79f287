//! Postgres values and the type catalogue.
//!
//! - [`Value`], every value this crate can transfer
//! - [`TypeInfo`], per oid transfer format and accepted parameter values
//!
//! Integration with external types:
//!
//! - [`serde`]'s [`Deserialize`][sd] and [`Serialize`][ss] via [`Json`]
//! - [`time`][::time]'s [`Date`][::time::Date], [`Time`][::time::Time],
//!   [`PrimitiveDateTime`][::time::PrimitiveDateTime] and [`OffsetDateTime`][::time::OffsetDateTime]
//! - [`uuid`]'s [`Uuid`][uuid::Uuid]
//!
//! [sd]: serde::Deserialize
//! [ss]: serde::Serialize
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{self, Write};

use crate::{
    postgres::{Oid, PgFormat, oid},
    row::DecodeError,
};

mod array;
mod geometric;
mod interval;
mod json;
mod numeric;
mod time;

pub use geometric::{Circle, Line, LineSegment, Path, PgBox, Point, Polygon};
pub use interval::Interval;
pub use json::Json;
pub use numeric::{Decimal, Numeric};

/// A decoded postgres value.
///
/// Composite and enum values are kept in their text representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Numeric),
    Text(String),
    Bytes(Bytes),
    Date(::time::Date),
    Time(::time::Time),
    TimeTz(::time::Time, ::time::UtcOffset),
    Timestamp(::time::PrimitiveDateTime),
    TimestampTz(::time::OffsetDateTime),
    Interval(Interval),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Point(Point),
    Line(Line),
    LineSegment(LineSegment),
    Box(PgBox),
    Path(Path),
    Polygon(Polygon),
    Circle(Circle),
    /// One dimensional array, element may be [`Value::Null`].
    Array(Vec<Value>),
}

impl Value {
    /// Name of the value kind, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytea",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeTz(..) => "timetz",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Interval(_) => "interval",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Point(_) => "point",
            Value::Line(_) => "line",
            Value::LineSegment(_) => "lseg",
            Value::Box(_) => "box",
            Value::Path(_) => "path",
            Value::Polygon(_) => "polygon",
            Value::Circle(_) => "circle",
            Value::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Decode a column value as sent by the server.
    pub fn decode(oid: Oid, format: PgFormat, value: Option<Bytes>) -> Result<Value, DecodeError> {
        let Some(value) = value else {
            return Ok(Value::Null);
        };
        match format {
            PgFormat::Binary => decode_binary(oid, value),
            PgFormat::Text => {
                let text = std::str::from_utf8(&value)?;
                decode_text(oid, text)
            }
        }
    }

    /// Write the text representation, as accepted by postgres input functions.
    ///
    /// [`Value::Null`] writes nothing, callers decide how NULL is represented.
    pub fn write_text(&self, out: &mut String) {
        match self {
            Value::Null => {}
            Value::Bool(v) => out.push(if *v { 't' } else { 'f' }),
            Value::Int2(v) => out.push_str(itoa::Buffer::new().format(*v)),
            Value::Int4(v) => out.push_str(itoa::Buffer::new().format(*v)),
            Value::Int8(v) => out.push_str(itoa::Buffer::new().format(*v)),
            Value::Float4(v) => push_display(out, FloatText(*v)),
            Value::Float8(v) => push_display(out, FloatText(*v)),
            Value::Numeric(v) => push_display(out, v),
            Value::Text(v) => out.push_str(v),
            Value::Bytes(v) => {
                out.push_str("\\x");
                for b in v.iter() {
                    push_display(out, format_args!("{b:02x}"));
                }
            }
            Value::Date(v) => time::date_to_text(*v, out),
            Value::Time(v) => time::time_to_text(*v, out),
            Value::TimeTz(t, o) => time::timetz_to_text(*t, *o, out),
            Value::Timestamp(v) => time::timestamp_to_text(*v, out),
            Value::TimestampTz(v) => time::timestamptz_to_text(*v, out),
            Value::Interval(v) => push_display(out, v),
            Value::Uuid(v) => push_display(out, v),
            Value::Json(v) => push_display(out, v),
            Value::Point(v) => push_display(out, v),
            Value::Line(v) => push_display(out, v),
            Value::LineSegment(v) => push_display(out, v),
            Value::Box(v) => push_display(out, v),
            Value::Path(v) => push_display(out, v),
            Value::Polygon(v) => push_display(out, v),
            Value::Circle(v) => push_display(out, v),
            Value::Array(elements) => {
                let delimiter = match elements.iter().any(|e| matches!(e, Value::Box(_))) {
                    true => ';',
                    false => ',',
                };
                write_text_array(elements, delimiter, out);
            }
        }
    }
}

fn push_display(out: &mut String, value: impl fmt::Display) {
    // writing into `String` never fails
    let _ = write!(out, "{value}");
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            value => {
                let mut out = String::new();
                value.write_text(&mut out);
                f.write_str(&out)
            }
        }
    }
}

fn write_text_array(elements: &[Value], delimiter: char, out: &mut String) {
    let texts = elements
        .iter()
        .map(|e| match e {
            Value::Null => None,
            e => {
                let mut s = String::new();
                e.write_text(&mut s);
                Some(s)
            }
        })
        .collect::<Vec<_>>();
    array::encode_text(texts.iter().map(Option::as_deref), delimiter, out);
}

// ===== Catalogue =====

/// Catalogue entry of a builtin type.
#[derive(Debug)]
pub struct TypeInfo {
    pub oid: Oid,
    pub name: &'static str,
    /// Format requested for result columns and used for parameters.
    pub format: PgFormat,
    /// Element type for arrays, [`oid::UNSPECIFIED`] otherwise.
    pub elem: Oid,
    /// Array element delimiter in text format.
    pub delimiter: char,
    /// [`Value`] kinds accepted as parameter, see [`Value::type_name`].
    pub accepts: &'static [&'static str],
}

const INTEGERS: &[&str] = &["int2", "int4", "int8"];
const FLOATS: &[&str] = &["float4", "float8", "int2", "int4", "int8"];
const NUMERICS: &[&str] = &["numeric", "int2", "int4", "int8", "float4", "float8"];
const TEXT: &[&str] = &["text"];
const ARRAY: &[&str] = &["array"];

/// Accepted kinds of parameter with unknown type.
pub const UNKNOWN_ACCEPTS: &[&str] = TEXT;

macro_rules! catalogue {
    ($($oid:ident, $name:literal, $fmt:ident, $accepts:expr;)* @arrays $($aoid:ident, $aname:literal, $elem:ident;)*) => {
        const SCALARS: &[TypeInfo] = &[$(
            TypeInfo {
                oid: oid::$oid,
                name: $name,
                format: PgFormat::$fmt,
                elem: oid::UNSPECIFIED,
                delimiter: ',',
                accepts: $accepts,
            },
        )*];

        static ARRAYS: &[TypeInfo] = &[$(
            TypeInfo {
                oid: oid::$aoid,
                name: $aname,
                format: match TypeInfo::scalar_format(oid::$elem) {
                    Some(format) => format,
                    None => PgFormat::Text,
                },
                elem: oid::$elem,
                delimiter: if oid::$elem == oid::BOX { ';' } else { ',' },
                accepts: ARRAY,
            },
        )*];
    };
}

catalogue! {
    BOOL, "bool", Binary, &["bool"];
    BYTEA, "bytea", Binary, &["bytea"];
    CHAR, "char", Text, TEXT;
    NAME, "name", Binary, TEXT;
    INT8, "int8", Binary, INTEGERS;
    INT2, "int2", Binary, INTEGERS;
    INT4, "int4", Binary, INTEGERS;
    TEXT, "text", Binary, TEXT;
    OID, "oid", Binary, INTEGERS;
    JSON, "json", Binary, &["json"];
    POINT, "point", Text, &["point"];
    LSEG, "lseg", Text, &["lseg"];
    PATH, "path", Text, &["path"];
    BOX, "box", Text, &["box"];
    POLYGON, "polygon", Text, &["polygon"];
    LINE, "line", Text, &["line"];
    FLOAT4, "float4", Binary, FLOATS;
    FLOAT8, "float8", Binary, FLOATS;
    UNKNOWN, "unknown", Text, TEXT;
    CIRCLE, "circle", Text, &["circle"];
    BPCHAR, "bpchar", Binary, TEXT;
    VARCHAR, "varchar", Binary, TEXT;
    DATE, "date", Binary, &["date"];
    TIME, "time", Binary, &["time"];
    TIMESTAMP, "timestamp", Binary, &["timestamp"];
    TIMESTAMPTZ, "timestamptz", Binary, &["timestamptz", "timestamp"];
    INTERVAL, "interval", Binary, &["interval"];
    TIMETZ, "timetz", Binary, &["timetz"];
    NUMERIC, "numeric", Text, NUMERICS;
    UUID, "uuid", Binary, &["uuid", "text"];
    JSONB, "jsonb", Binary, &["json"];
    @arrays
    BOOL_ARRAY, "_bool", BOOL;
    BYTEA_ARRAY, "_bytea", BYTEA;
    CHAR_ARRAY, "_char", CHAR;
    NAME_ARRAY, "_name", NAME;
    INT2_ARRAY, "_int2", INT2;
    INT4_ARRAY, "_int4", INT4;
    TEXT_ARRAY, "_text", TEXT;
    BPCHAR_ARRAY, "_bpchar", BPCHAR;
    VARCHAR_ARRAY, "_varchar", VARCHAR;
    INT8_ARRAY, "_int8", INT8;
    POINT_ARRAY, "_point", POINT;
    LSEG_ARRAY, "_lseg", LSEG;
    PATH_ARRAY, "_path", PATH;
    BOX_ARRAY, "_box", BOX;
    FLOAT4_ARRAY, "_float4", FLOAT4;
    FLOAT8_ARRAY, "_float8", FLOAT8;
    POLYGON_ARRAY, "_polygon", POLYGON;
    JSON_ARRAY, "_json", JSON;
    LINE_ARRAY, "_line", LINE;
    CIRCLE_ARRAY, "_circle", CIRCLE;
    TIMESTAMP_ARRAY, "_timestamp", TIMESTAMP;
    DATE_ARRAY, "_date", DATE;
    TIME_ARRAY, "_time", TIME;
    TIMESTAMPTZ_ARRAY, "_timestamptz", TIMESTAMPTZ;
    INTERVAL_ARRAY, "_interval", INTERVAL;
    NUMERIC_ARRAY, "_numeric", NUMERIC;
    TIMETZ_ARRAY, "_timetz", TIMETZ;
    UUID_ARRAY, "_uuid", UUID;
    JSONB_ARRAY, "_jsonb", JSONB;
}

impl TypeInfo {
    /// Find catalogue entry of a builtin type.
    pub fn lookup(oid: Oid) -> Option<&'static TypeInfo> {
        SCALARS.iter().chain(ARRAYS).find(|e| e.oid == oid)
    }

    /// Transfer format for a type, unknown types are transferred as text.
    pub fn format_of(oid: Oid) -> PgFormat {
        TypeInfo::lookup(oid).map_or(PgFormat::Text, |e| e.format)
    }

    pub fn is_array(&self) -> bool {
        self.elem != oid::UNSPECIFIED
    }

    const fn scalar_format(oid: Oid) -> Option<PgFormat> {
        // const context, no iterator
        let mut i = 0;
        while i < SCALARS.len() {
            if SCALARS[i].oid == oid {
                return Some(SCALARS[i].format);
            }
            i += 1;
        }
        None
    }
}

// ===== Decode =====

/// Parse float text, including the `NaN` and `Infinity` spelling.
pub(crate) fn parse_float(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        s => s.parse().ok(),
    }
}

/// Display float with postgres spelling of special values.
pub(crate) struct FloatText<F>(pub F);

macro_rules! float_text {
    ($($ty:ty),*) => {$(
        impl fmt::Display for FloatText<$ty> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    v if v.is_nan() => f.write_str("NaN"),
                    v if v == <$ty>::INFINITY => f.write_str("Infinity"),
                    v if v == <$ty>::NEG_INFINITY => f.write_str("-Infinity"),
                    v => write!(f, "{v}"),
                }
            }
        }
    )*};
}

float_text!(f32, f64);

fn expect_len(value: &Bytes, len: usize) -> Result<(), DecodeError> {
    match value.len() == len {
        true => Ok(()),
        false => Err(DecodeError::malformed("unexpected binary value length")),
    }
}

fn utf8(value: Bytes) -> Result<String, DecodeError> {
    Ok(String::from_utf8(value.into())?)
}

fn decode_binary(oid: Oid, mut value: Bytes) -> Result<Value, DecodeError> {
    let value = match oid {
        oid::BOOL => {
            expect_len(&value, 1)?;
            Value::Bool(value[0] != 0)
        }
        oid::INT2 => {
            expect_len(&value, 2)?;
            Value::Int2(value.get_i16())
        }
        oid::INT4 => {
            expect_len(&value, 4)?;
            Value::Int4(value.get_i32())
        }
        oid::INT8 => {
            expect_len(&value, 8)?;
            Value::Int8(value.get_i64())
        }
        oid::OID => {
            expect_len(&value, 4)?;
            Value::Int8(value.get_u32() as i64)
        }
        oid::FLOAT4 => {
            expect_len(&value, 4)?;
            Value::Float4(value.get_f32())
        }
        oid::FLOAT8 => {
            expect_len(&value, 8)?;
            Value::Float8(value.get_f64())
        }
        oid::NUMERIC => Value::Numeric(Numeric::decode_binary(value)?),
        oid::BYTEA => Value::Bytes(value),
        oid::CHAR => Value::Text(utf8(value)?),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN => Value::Text(utf8(value)?),
        oid::DATE => Value::Date(time::date_from_binary(value)?),
        oid::TIME => Value::Time(time::time_from_binary(value)?),
        oid::TIMETZ => {
            let (t, o) = time::timetz_from_binary(value)?;
            Value::TimeTz(t, o)
        }
        oid::TIMESTAMP => Value::Timestamp(time::timestamp_from_binary(value)?),
        oid::TIMESTAMPTZ => Value::TimestampTz(time::timestamptz_from_binary(value)?),
        oid::INTERVAL => {
            expect_len(&value, 16)?;
            let microseconds = value.get_i64();
            let days = value.get_i32();
            let months = value.get_i32();
            Value::Interval(Interval { months, days, microseconds })
        }
        oid::UUID => {
            let bytes = <[u8; 16]>::try_from(&value[..])
                .map_err(|_| DecodeError::malformed("uuid is not 16 bytes"))?;
            Value::Uuid(uuid::Uuid::from_bytes(bytes))
        }
        oid::JSON => Value::Json(serde_json::from_slice(&value)?),
        oid::JSONB => {
            if value.first() != Some(&1) {
                return Err(DecodeError::malformed("unsupported jsonb version"));
            }
            Value::Json(serde_json::from_slice(&value[1..])?)
        }
        // the server has no binary codec for these, the payload is textual
        oid::POINT | oid::LINE | oid::LSEG | oid::BOX | oid::PATH | oid::POLYGON | oid::CIRCLE => {
            decode_text(oid, std::str::from_utf8(&value)?)?
        }
        other => match TypeInfo::lookup(other) {
            Some(info) if info.is_array() => {
                let (elem, elements) = array::decode_binary(value)?;
                let elem = if elem == oid::UNSPECIFIED { info.elem } else { elem };
                let elements = elements
                    .into_iter()
                    .map(|e| e.map_or(Ok(Value::Null), |e| decode_binary(elem, e)))
                    .collect::<Result<_, _>>()?;
                Value::Array(elements)
            }
            // enum, composite, domain and other user types
            _ => match String::from_utf8(value.to_vec()) {
                Ok(text) => Value::Text(text),
                Err(_) => Value::Bytes(value),
            },
        },
    };
    Ok(value)
}

fn malformed<E>(reason: &'static str) -> impl FnOnce(E) -> DecodeError {
    move |_| DecodeError::malformed(reason)
}

fn decode_text(oid: Oid, text: &str) -> Result<Value, DecodeError> {
    let value = match oid {
        oid::BOOL => match text {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => return Err(DecodeError::malformed("invalid bool")),
        },
        oid::INT2 => Value::Int2(text.parse().map_err(malformed("invalid int2"))?),
        oid::INT4 => Value::Int4(text.parse().map_err(malformed("invalid int4"))?),
        oid::INT8 => Value::Int8(text.parse().map_err(malformed("invalid int8"))?),
        oid::OID => Value::Int8(text.parse::<u32>().map_err(malformed("invalid oid"))? as i64),
        oid::FLOAT4 => Value::Float4(
            parse_float(text).ok_or_else(|| DecodeError::malformed("invalid float4"))? as f32,
        ),
        oid::FLOAT8 => Value::Float8(
            parse_float(text).ok_or_else(|| DecodeError::malformed("invalid float8"))?,
        ),
        oid::NUMERIC => Value::Numeric(text.parse()?),
        oid::BYTEA => Value::Bytes(decode_bytea_text(text)?),
        oid::DATE => Value::Date(time::date_from_text(text)?),
        oid::TIME => Value::Time(time::time_from_text(text)?),
        oid::TIMETZ => {
            let (t, o) = time::timetz_from_text(text)?;
            Value::TimeTz(t, o)
        }
        oid::TIMESTAMP => Value::Timestamp(time::timestamp_from_text(text)?),
        oid::TIMESTAMPTZ => Value::TimestampTz(time::timestamptz_from_text(text)?),
        oid::INTERVAL => Value::Interval(Interval::parse(text)?),
        oid::UUID => Value::Uuid(uuid::Uuid::parse_str(text).map_err(malformed("invalid uuid"))?),
        oid::JSON | oid::JSONB => Value::Json(serde_json::from_str(text)?),
        oid::POINT => Value::Point(Point::parse(text)?),
        oid::LINE => Value::Line(Line::parse(text)?),
        oid::LSEG => Value::LineSegment(LineSegment::parse(text)?),
        oid::BOX => Value::Box(PgBox::parse(text)?),
        oid::PATH => Value::Path(Path::parse(text)?),
        oid::POLYGON => Value::Polygon(Polygon::parse(text)?),
        oid::CIRCLE => Value::Circle(Circle::parse(text)?),
        other => match TypeInfo::lookup(other) {
            Some(info) if info.is_array() => {
                let elements = array::decode_text(text, info.delimiter)?
                    .into_iter()
                    .map(|e| e.map_or(Ok(Value::Null), |e| decode_text(info.elem, &e)))
                    .collect::<Result<_, _>>()?;
                Value::Array(elements)
            }
            // text types, enum, composite, domain: as received, pad spaces included
            _ => Value::Text(text.to_owned()),
        },
    };
    Ok(value)
}

/// `bytea` text output, hex `\x...` or the legacy escape format.
fn decode_bytea_text(text: &str) -> Result<Bytes, DecodeError> {
    let malformed = || DecodeError::malformed("invalid bytea");
    if let Some(hex) = text.strip_prefix("\\x") {
        let hex = hex.as_bytes();
        if hex.len() % 2 != 0 {
            return Err(malformed());
        }
        let digit = |b: u8| char::from(b).to_digit(16).ok_or_else(malformed);
        let bytes = hex
            .chunks_exact(2)
            .map(|pair| Ok((digit(pair[0])? * 16 + digit(pair[1])?) as u8))
            .collect::<Result<Vec<_>, DecodeError>>()?;
        return Ok(bytes.into());
    }

    let mut out = BytesMut::with_capacity(text.len());
    let mut bytes = text.as_bytes();
    while let Some((&b, rest)) = bytes.split_first() {
        bytes = rest;
        if b != b'\\' {
            out.put_u8(b);
            continue;
        }
        match bytes {
            [b'\\', rest @ ..] => {
                out.put_u8(b'\\');
                bytes = rest;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', rest @ ..] => {
                out.put_u8((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'));
                bytes = rest;
            }
            _ => return Err(malformed()),
        }
    }
    Ok(out.freeze())
}

// ===== Encode =====

macro_rules! narrow {
    ($v:expr, $variant:ident, $ty:ty) => {
        <$ty>::try_from($v).ok().map(Value::$variant)
    };
}

/// Coerce value into the exact kind required by a parameter type.
///
/// Returns `None` if value is not accepted.
pub(crate) fn coerce(value: &Value, oid: Oid) -> Option<Value> {
    use Value as V;

    let coerced = match (oid, value) {
        (_, V::Null) => V::Null,

        (oid::BOOL, V::Bool(v)) => V::Bool(*v),

        (oid::INT2, V::Int2(v)) => V::Int2(*v),
        (oid::INT2, V::Int4(v)) => narrow!(*v, Int2, i16)?,
        (oid::INT2, V::Int8(v)) => narrow!(*v, Int2, i16)?,
        (oid::INT4, V::Int2(v)) => V::Int4(*v as i32),
        (oid::INT4, V::Int4(v)) => V::Int4(*v),
        (oid::INT4, V::Int8(v)) => narrow!(*v, Int4, i32)?,
        (oid::INT8, V::Int2(v)) => V::Int8(*v as i64),
        (oid::INT8, V::Int4(v)) => V::Int8(*v as i64),
        (oid::INT8, V::Int8(v)) => V::Int8(*v),
        (oid::OID, V::Int2(v)) => u32::try_from(*v).ok().map(|v| V::Int8(v as i64))?,
        (oid::OID, V::Int4(v)) => u32::try_from(*v).ok().map(|v| V::Int8(v as i64))?,
        (oid::OID, V::Int8(v)) => u32::try_from(*v).ok().map(|v| V::Int8(v as i64))?,

        (oid::FLOAT4, V::Float4(v)) => V::Float4(*v),
        (oid::FLOAT4, V::Float8(v)) => V::Float4(*v as f32),
        (oid::FLOAT4, V::Int2(v)) => V::Float4(*v as f32),
        (oid::FLOAT4, V::Int4(v)) => V::Float4(*v as f32),
        (oid::FLOAT4, V::Int8(v)) => V::Float4(*v as f32),
        (oid::FLOAT8, V::Float4(v)) => V::Float8(*v as f64),
        (oid::FLOAT8, V::Float8(v)) => V::Float8(*v),
        (oid::FLOAT8, V::Int2(v)) => V::Float8(*v as f64),
        (oid::FLOAT8, V::Int4(v)) => V::Float8(*v as f64),
        (oid::FLOAT8, V::Int8(v)) => V::Float8(*v as f64),

        (oid::NUMERIC, V::Numeric(v)) => V::Numeric(v.clone()),
        (oid::NUMERIC, V::Int2(v)) => V::Numeric((*v as i64).into()),
        (oid::NUMERIC, V::Int4(v)) => V::Numeric((*v as i64).into()),
        (oid::NUMERIC, V::Int8(v)) => V::Numeric((*v).into()),
        (oid::NUMERIC, V::Float4(v)) => V::Numeric((*v).into()),
        (oid::NUMERIC, V::Float8(v)) => V::Numeric((*v).into()),

        (oid::BYTEA, V::Bytes(v)) => V::Bytes(v.clone()),
        (oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN, V::Text(v)) => {
            V::Text(v.clone())
        }

        (oid::DATE, V::Date(v)) => V::Date(*v),
        (oid::TIME, V::Time(v)) => V::Time(*v),
        (oid::TIMETZ, V::TimeTz(t, o)) => V::TimeTz(*t, *o),
        (oid::TIMESTAMP, V::Timestamp(v)) => V::Timestamp(*v),
        (oid::TIMESTAMPTZ, V::TimestampTz(v)) => V::TimestampTz(*v),
        (oid::TIMESTAMPTZ, V::Timestamp(v)) => V::TimestampTz(v.assume_utc()),
        (oid::INTERVAL, V::Interval(v)) => V::Interval(*v),

        (oid::UUID, V::Uuid(v)) => V::Uuid(*v),
        (oid::UUID, V::Text(v)) => V::Uuid(uuid::Uuid::parse_str(v).ok()?),
        (oid::JSON | oid::JSONB, V::Json(v)) => V::Json(v.clone()),

        (oid::POINT, V::Point(v)) => V::Point(*v),
        (oid::LINE, V::Line(v)) => V::Line(*v),
        (oid::LSEG, V::LineSegment(v)) => V::LineSegment(*v),
        (oid::BOX, V::Box(v)) => V::Box(*v),
        (oid::PATH, V::Path(v)) => V::Path(v.clone()),
        (oid::POLYGON, V::Polygon(v)) => V::Polygon(v.clone()),
        (oid::CIRCLE, V::Circle(v)) => V::Circle(*v),

        (oid, V::Array(elements)) => {
            let info = TypeInfo::lookup(oid).filter(|e| e.is_array())?;
            let elements = elements
                .iter()
                .map(|e| coerce(e, info.elem))
                .collect::<Option<Vec<_>>>()?;
            V::Array(elements)
        }

        // enum, composite, domain and other user types, sent as text
        (oid, V::Text(v)) if TypeInfo::lookup(oid).is_none() => V::Text(v.clone()),

        _ => return None,
    };
    Some(coerced)
}

/// Encode an already coerced value in the format of `oid`.
pub(crate) fn encode_param(value: &Value, oid: Oid) -> (PgFormat, Option<Bytes>) {
    let format = TypeInfo::format_of(oid);
    if value.is_null() {
        return (format, None);
    }
    let bytes = match format {
        PgFormat::Text => {
            let mut out = String::new();
            match (TypeInfo::lookup(oid), value) {
                (Some(info), Value::Array(elements)) => write_text_array(elements, info.delimiter, &mut out),
                _ => value.write_text(&mut out),
            }
            Bytes::from(out)
        }
        PgFormat::Binary => {
            let mut buf = BytesMut::new();
            encode_binary(value, oid, &mut buf);
            buf.freeze()
        }
    };
    (format, Some(bytes))
}

fn encode_binary(value: &Value, oid: Oid, buf: &mut BytesMut) {
    match value {
        Value::Null => {}
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Int2(v) => buf.put_i16(*v),
        Value::Int4(v) => buf.put_i32(*v),
        Value::Int8(v) if oid == oid::OID => buf.put_u32(*v as u32),
        Value::Int8(v) => buf.put_i64(*v),
        Value::Float4(v) => buf.put_f32(*v),
        Value::Float8(v) => buf.put_f64(*v),
        Value::Numeric(v) => v.encode_binary(buf),
        Value::Bytes(v) => buf.put_slice(v),
        Value::Text(v) => buf.put_slice(v.as_bytes()),
        Value::Date(v) => time::date_to_binary(*v, buf),
        Value::Time(v) => time::time_to_binary(*v, buf),
        Value::TimeTz(t, o) => time::timetz_to_binary(*t, *o, buf),
        Value::Timestamp(v) => time::timestamp_to_binary(*v, buf),
        Value::TimestampTz(v) => time::timestamptz_to_binary(*v, buf),
        Value::Interval(v) => {
            buf.put_i64(v.microseconds);
            buf.put_i32(v.days);
            buf.put_i32(v.months);
        }
        Value::Uuid(v) => buf.put_slice(v.as_bytes()),
        Value::Json(v) => {
            if oid == oid::JSONB {
                buf.put_u8(1);
            }
            buf.put_slice(v.to_string().as_bytes());
        }
        Value::Array(elements) => {
            let elem = TypeInfo::lookup(oid).map_or(oid::UNSPECIFIED, |e| e.elem);
            let elements = elements
                .iter()
                .map(|e| encode_param(e, elem).1)
                .collect::<Vec<_>>();
            array::encode_binary(elem, &elements, buf);
        }
        // text format types
        value => {
            let mut out = String::new();
            value.write_text(&mut out);
            buf.put_slice(out.as_bytes());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(value: Value, oid: Oid) -> Value {
        let coerced = coerce(&value, oid).expect("accepted");
        let (format, bytes) = encode_param(&coerced, oid);
        Value::decode(oid, format, bytes).unwrap()
    }

    #[test]
    fn catalogue_formats() {
        assert_eq!(TypeInfo::format_of(oid::INT4), PgFormat::Binary);
        assert_eq!(TypeInfo::format_of(oid::NUMERIC), PgFormat::Text);
        assert_eq!(TypeInfo::format_of(oid::NUMERIC_ARRAY), PgFormat::Text);
        assert_eq!(TypeInfo::format_of(oid::INT4_ARRAY), PgFormat::Binary);
        assert_eq!(TypeInfo::format_of(oid::POINT), PgFormat::Text);
        // user defined enum
        assert_eq!(TypeInfo::format_of(16_384), PgFormat::Text);
        assert_eq!(TypeInfo::lookup(oid::BOX_ARRAY).unwrap().delimiter, ';');
    }

    #[test]
    fn edge_values() {
        assert_eq!(roundtrip(Value::Int2(i16::MIN), oid::INT2), Value::Int2(i16::MIN));
        assert_eq!(roundtrip(Value::Float8(f64::MAX), oid::FLOAT8), Value::Float8(f64::MAX));
        assert_eq!(
            roundtrip(Value::Numeric(Numeric::NaN), oid::NUMERIC),
            Value::Numeric(Numeric::NaN)
        );
        assert_eq!(roundtrip(Value::Array(vec![]), oid::INT4_ARRAY), Value::Array(vec![]));
        assert_eq!(
            roundtrip(Value::Array(vec![Value::Int4(1), Value::Null]), oid::INT8_ARRAY),
            Value::Array(vec![Value::Int8(1), Value::Null])
        );
        assert_eq!(
            roundtrip(Value::Text("a  ".into()), oid::BPCHAR),
            Value::Text("a  ".into())
        );
    }

    #[test]
    fn text_arrays_of_text_types() {
        let numeric = Value::Array(vec![Value::Int4(2), Value::Float8(f64::NAN)]);
        assert_eq!(
            roundtrip(numeric, oid::NUMERIC_ARRAY),
            Value::Array(vec![Value::Numeric(Numeric::from(2i64)), Value::Numeric(Numeric::NaN)])
        );

        let boxes = Value::Array(vec![Value::Box(PgBox::default())]);
        let (format, bytes) = encode_param(&boxes, oid::BOX_ARRAY);
        assert_eq!(format, PgFormat::Text);
        assert_eq!(bytes.unwrap(), "{(0,0),(0,0)}");
    }

    #[test]
    fn rejects_unaccepted() {
        assert!(coerce(&Value::Text("1".into()), oid::INT4).is_none());
        assert!(coerce(&Value::Int8(i64::MAX), oid::INT4).is_none());
        assert!(coerce(&Value::Array(vec![Value::Bool(true)]), oid::INT4_ARRAY).is_none());
        assert_eq!(coerce(&Value::Null, oid::INT4), Some(Value::Null));
        assert!(coerce(&Value::Text("happy".into()), 16_384).is_some());
    }

    #[test]
    fn numeric_binary_value() {
        for text in ["-98765.4321", "0.000", "NaN", "Infinity"] {
            let value = Value::Numeric(text.parse().unwrap());
            let mut buf = BytesMut::new();
            encode_binary(&value, oid::NUMERIC, &mut buf);
            let decoded = Value::decode(oid::NUMERIC, PgFormat::Binary, Some(buf.freeze())).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn bytea_text_formats() {
        assert_eq!(decode_bytea_text("\\x00ff").unwrap(), &b"\x00\xff"[..]);
        assert_eq!(decode_bytea_text("a\\\\b\\001").unwrap(), &b"a\\b\x01"[..]);
        assert!(decode_bytea_text("\\x0\u{e9}0").is_err());
        assert!(decode_bytea_text("\\x+f").is_err());
        assert!(decode_bytea_text("\\x\u{e9}").is_err());
        assert!(Value::decode(oid::BYTEA, PgFormat::Text, Some(Bytes::from("\\x0\u{e9}0"))).is_err());
        assert!(decode_bytea_text("\\x0").is_err());
    }

    #[test]
    fn float_text() {
        assert_eq!(Value::Float8(f64::NEG_INFINITY).to_string(), "-Infinity");
        assert_eq!(Value::Float4(1.5).to_string(), "1.5");
        assert!(matches!(
            decode_text(oid::FLOAT8, "NaN").unwrap(),
            Value::Float8(v) if v.is_nan()
        ));
    }
}
