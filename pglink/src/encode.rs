//! Query parameter encoding.
//!
//! Parameters are collected as [`Value`], then coerced into the type the
//! server described for each position before any message is sent.
use bytes::Bytes;
use std::fmt;

use crate::{
    postgres::{Oid, PgFormat},
    types::{self, TypeInfo, Value, UNKNOWN_ACCEPTS},
};

/// Value that can be encoded to be bound to sql parameter.
pub trait Encode {
    /// Convert self into [`Value`].
    fn encode(self) -> Value;
}

impl Encode for Value {
    fn encode(self) -> Value {
        self
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(self) -> Value {
        match self {
            Some(v) => v.encode(),
            None => Value::Null,
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(self) -> Value {
        Value::Array(self.into_iter().map(Encode::encode).collect())
    }
}

macro_rules! encode {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl Encode for $ty {
            fn encode(self) -> Value {
                Value::$variant(self.into())
            }
        }
    )*};
}

encode! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    &str => Text,
    &String => Text,
    Bytes => Bytes,
    uuid::Uuid => Uuid,
}

impl Encode for &[u8] {
    fn encode(self) -> Value {
        Value::Bytes(Bytes::copy_from_slice(self))
    }
}

impl Encode for u32 {
    fn encode(self) -> Value {
        Value::Int8(self.into())
    }
}

/// A row of parameter values.
///
/// Used to bind parameters for [`batch`][crate::query::Query::batch] and
/// [`CopyIn::write_row`][crate::copy::CopyIn::write_row].
///
/// ```
/// use pglink::encode::Tuple;
///
/// let tuple = Tuple::new().add(1).add("foo").add(None::<i64>);
/// assert_eq!(tuple.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Create empty [`Tuple`].
    pub fn new() -> Tuple {
        Tuple { values: Vec::new() }
    }

    /// Append value, returning self.
    pub fn add<V: Encode>(mut self, value: V) -> Tuple {
        self.values.push(value.encode());
        self
    }

    /// Append value.
    pub fn push<V: Encode>(&mut self, value: V) {
        self.values.push(value.encode());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple { values }
    }
}

macro_rules! tuple_from {
    ($($t:ident $v:ident),*) => {
        impl<$($t),*> From<($($t,)*)> for Tuple
        where
            $($t: Encode),*
        {
            fn from(($($v,)*): ($($t,)*)) -> Self {
                Tuple { values: vec![$($v.encode()),*] }
            }
        }
    };
}

tuple_from!(T0 v0);
tuple_from!(T0 v0, T1 v1);
tuple_from!(T0 v0, T1 v1, T2 v2);
tuple_from!(T0 v0, T1 v1, T2 v2, T3 v3);
tuple_from!(T0 v0, T1 v1, T2 v2, T3 v3, T4 v4);
tuple_from!(T0 v0, T1 v1, T2 v2, T3 v3, T4 v4, T5 v5);
tuple_from!(T0 v0, T1 v1, T2 v2, T3 v3, T4 v4, T5 v5, T6 v6);
tuple_from!(T0 v0, T1 v1, T2 v2, T3 v3, T4 v4, T5 v5, T6 v6, T7 v7);

/// Parameters ready to be sent in `Bind`.
#[derive(Debug, Default)]
pub(crate) struct Encoded {
    pub formats: Vec<PgFormat>,
    pub values: Vec<Option<Bytes>>,
}

/// Coerce and encode `values` against parameter types described by the server.
pub(crate) fn encode_params(values: &[Value], oids: &[Oid]) -> Result<Encoded, EncodeError> {
    if values.len() != oids.len() {
        return Err(EncodeError::Count { expected: oids.len(), found: values.len() });
    }

    let mut encoded = Encoded {
        formats: Vec::with_capacity(values.len()),
        values: Vec::with_capacity(values.len()),
    };

    for (index, (value, &oid)) in values.iter().zip(oids).enumerate() {
        let Some(value) = types::coerce(value, oid) else {
            let accepted = TypeInfo::lookup(oid).map_or(UNKNOWN_ACCEPTS, |e| e.accepts);
            return Err(EncodeError::Type { index, value: value.clone(), accepted });
        };
        let (format, bytes) = types::encode_param(&value, oid);
        encoded.formats.push(format);
        encoded.values.push(bytes);
    }

    Ok(encoded)
}

/// An error when parameter cannot be sent as the type the server expect.
///
/// Returned before any message of the statement execution is sent.
pub enum EncodeError {
    /// Value at `index` is not accepted.
    Type {
        index: usize,
        value: Value,
        /// Value kinds accepted at `index`, see [`Value::type_name`].
        accepted: &'static [&'static str],
    },
    /// Number of parameters does not match the statement.
    Count {
        expected: usize,
        found: usize,
    },
    /// Rows can only be serialized for `COPY` in text format.
    CopyFormat,
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type { index, value, accepted } => write!(
                f,
                "parameter ${} `{}` of kind `{}` is not accepted, expected one of {accepted:?}",
                index + 1,
                value,
                value.type_name(),
            ),
            Self::Count { expected, found } => {
                write!(f, "statement expect {expected} parameters, found {found}")
            }
            Self::CopyFormat => f.write_str("rows can only be written to COPY in text format"),
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::oid;

    #[test]
    fn tuple_from_tuple() {
        let tuple = Tuple::from((1i32, "a", Some(2.5f64)));
        assert_eq!(
            tuple.values(),
            &[Value::Int4(1), Value::Text("a".into()), Value::Float8(2.5)]
        );
    }

    #[test]
    fn validation_lists_accepted() {
        let err = encode_params(&[Value::Int4(1), Value::Text("x".into())], &[oid::INT8, oid::INT4])
            .unwrap_err();
        match err {
            EncodeError::Type { index, value, accepted } => {
                assert_eq!(index, 1);
                assert_eq!(value, Value::Text("x".into()));
                assert!(accepted.contains(&"int4"));
            }
            err => panic!("expected type error, found {err}"),
        }

        let err = encode_params(&[], &[oid::INT4]).unwrap_err();
        assert!(matches!(err, EncodeError::Count { expected: 1, found: 0 }));
    }

    #[test]
    fn formats_follow_catalogue() {
        let encoded = encode_params(
            &[Value::Int4(7), Value::Int4(7), Value::Null],
            &[oid::INT8, oid::NUMERIC, oid::TEXT],
        )
        .unwrap();
        assert_eq!(encoded.formats, [PgFormat::Binary, PgFormat::Text, PgFormat::Binary]);
        assert_eq!(encoded.values[0].as_deref(), Some(&7i64.to_be_bytes()[..]));
        assert_eq!(encoded.values[1].as_deref(), Some(&b"7"[..]));
        assert_eq!(encoded.values[2], None);
    }
}
