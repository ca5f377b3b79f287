//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`RowDescriptor`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error, sync::Arc};

use crate::{
    common::{ByteStr, unit_error},
    ext::{BytesExt, FmtExt},
    postgres::{Oid, PgFormat, ProtocolError, backend::{DataRow, RowDescription}},
    types::Value,
};

/// Description of a result column.
#[derive(Debug, Clone)]
pub struct Field {
    name: ByteStr,
    table_oid: Oid,
    column_id: i16,
    oid: Oid,
    type_size: i16,
    type_modifier: i32,
    format: PgFormat,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// If the field can be identified as a column of a specific table, the object ID of the table; otherwise zero.
    pub fn table_oid(&self) -> Oid {
        self.table_oid
    }

    /// If the field can be identified as a column of a specific table, the attribute number of the column; otherwise zero.
    pub fn column_id(&self) -> i16 {
        self.column_id
    }

    /// The object ID of the field's data type.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The data type size, negative values denote variable-width types.
    pub fn type_size(&self) -> i16 {
        self.type_size
    }

    pub fn type_modifier(&self) -> i32 {
        self.type_modifier
    }

    pub fn format(&self) -> PgFormat {
        self.format
    }
}

/// Ordered column descriptions, shared by every row of one result.
#[derive(Debug, Clone, Default)]
pub struct RowDescriptor {
    fields: Vec<Field>,
}

impl RowDescriptor {
    /// `RowDescription` message
    pub(crate) fn parse(desc: RowDescription) -> Result<RowDescriptor, ProtocolError> {
        let mut body = desc.body;
        let mut fields = Vec::with_capacity(desc.field_len as usize);
        for _ in 0..desc.field_len {
            let name = body.get_nul_bytestr()?;
            if body.remaining() < 18 {
                return Err(ProtocolError::malformed("row description truncated"));
            }
            fields.push(Field {
                name,
                table_oid: body.get_u32(),
                column_id: body.get_i16(),
                oid: body.get_u32(),
                type_size: body.get_i16(),
                type_modifier: body.get_i32(),
                format: PgFormat::from_code(body.get_u16()),
            });
        }
        Ok(RowDescriptor { fields })
    }

    /// Override result format of every column.
    ///
    /// Describing a statement returns text format for every column, as the
    /// actual format is only known when binding.
    pub(crate) fn with_formats(mut self, format: impl Fn(Oid) -> PgFormat) -> RowDescriptor {
        for field in &mut self.fields {
            field.format = format(field.oid);
        }
        self
    }

    /// Result format for each column, as sent in `Bind`.
    pub(crate) fn formats(&self) -> Vec<PgFormat> {
        self.fields.iter().map(|e| e.format).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Find column position by name, first match wins.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|e| e.name == name)
    }
}

/// Postgres row.
#[derive(Clone)]
pub struct Row {
    desc: Arc<RowDescriptor>,
    values: Vec<Option<Bytes>>,
}

impl Row {
    /// `DataRow` message
    pub(crate) fn new(desc: Arc<RowDescriptor>, row: DataRow) -> Result<Row, ProtocolError> {
        if row.column_len as usize != desc.len() {
            return Err(ProtocolError::malformed("RowDescription len missmatch with DataRow len"));
        }
        let mut body = row.body;
        let values = (0..row.column_len)
            .map(|_| body.get_nullable())
            .collect::<Result<_, _>>()?;
        Ok(Row { desc, values })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of fields/column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns the column descriptions.
    pub fn descriptor(&self) -> &RowDescriptor {
        &self.desc
    }

    /// Get column by index or name.
    pub fn column<I: Index>(&self, idx: I) -> Result<Column, DecodeError> {
        let nth = idx.position(&self.desc)?;
        Ok(Column::new(&self.desc.fields[nth], self.values[nth].clone()))
    }

    /// Try get and decode column into [`Value`].
    pub fn get_value<I: Index>(&self, idx: I) -> Result<Value, DecodeError> {
        self.column(idx)?.to_value()
    }

    /// Try get and decode column.
    pub fn try_get<I: Index, R: Decode>(&self, idx: I) -> Result<R, DecodeError> {
        R::decode(self.column(idx)?)
    }

    /// Returns `true` if column value is NULL.
    pub fn is_null<I: Index>(&self, idx: I) -> Result<bool, DecodeError> {
        Ok(self.values[idx.position(&self.desc)?].is_none())
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<D: FromRow>(self) -> Result<D, DecodeError> {
        D::from_row(self)
    }

    /// Decode every column.
    pub fn into_values(self) -> Result<Vec<Value>, DecodeError> {
        self.into_iter().map(|e| e.to_value()).collect()
    }
}

impl IntoIterator for Row {
    type Item = Column;

    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            desc: self.desc,
            values: self.values.into_iter(),
            iter_n: 0,
        }
    }
}

/// [`IntoIterator`] implementation from [`Row`].
#[derive(Debug)]
pub struct IntoIter {
    desc: Arc<RowDescriptor>,
    values: std::vec::IntoIter<Option<Bytes>>,
    iter_n: usize,
}

impl IntoIter {
    /// Same as [`Iterator::next`] but returns [`Result`] instead.
    pub fn try_next(&mut self) -> Result<Column, DecodeError> {
        match self.next() {
            Some(ok) => Ok(ok),
            None => Err(DecodeError::IndexOutOfBounds(self.iter_n)),
        }
    }
}

impl Iterator for IntoIter {
    type Item = Column;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.values.next()?;
        let column = Column::new(&self.desc.fields[self.iter_n], value);
        self.iter_n += 1;
        Some(column)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (field, value) in self.desc.fields.iter().zip(&self.values) {
            dbg.key(&field.name);
            match value {
                None => dbg.value(&format_args!("NULL")),
                Some(v) => dbg.value(&v.lossy()),
            };
        }
        dbg.finish()
    }
}

/// Postgres column.
#[derive(Debug, Clone)]
pub struct Column {
    oid: Oid,
    format: PgFormat,
    value: Option<Bytes>,
    name: ByteStr,
}

impl Column {
    fn new(field: &Field, value: Option<Bytes>) -> Self {
        Self {
            name: field.name.clone(),
            oid: field.oid,
            format: field.format,
            value,
        }
    }

    /// Returns column [`Oid`].
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Returns the format the value is transferred in.
    pub const fn format(&self) -> PgFormat {
        self.format
    }

    /// Returns column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return `true` if value is NULL.
    pub const fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice.
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Consume self into the inner [`Bytes`].
    ///
    /// Returns [`None`] if value is `NULL`.
    pub fn into_raw(self) -> Option<Bytes> {
        self.value
    }

    /// Decode the value according to its oid and format.
    pub fn to_value(&self) -> Result<Value, DecodeError> {
        Value::decode(self.oid, self.format, self.value.clone())
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

/// Query result with its rows affected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowResult {
    pub rows_affected: u64,
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        row.into_values()
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5, T6 6, T7 7);

/// A type that can be constructed from [`Value`].
///
/// A value of a different kind is rejected with [`DecodeError::TypeMismatch`],
/// except numeric conversions, which truncates when narrowing.
pub trait Decode: Sized {
    /// Try decode self from decoded value.
    fn decode_value(value: Value) -> Result<Self, DecodeError>;

    /// Try decode self from column.
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Self::decode_value(column.to_value()?)
    }
}

impl Decode for Value {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        Ok(value)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            value => T::decode_value(value).map(Some),
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(elements) => elements.into_iter().map(T::decode_value).collect(),
            Value::Null => Err(DecodeError::Null),
            other => Err(DecodeError::mismatch("array", &other)),
        }
    }
}

macro_rules! decode {
    ($ty:ty, $name:literal, $($pat:pat => $body:expr),* $(,)?) => {
        impl Decode for $ty {
            fn decode_value(value: Value) -> Result<Self, DecodeError> {
                match value {
                    $($pat => Ok($body),)*
                    Value::Null => Err(DecodeError::Null),
                    other => Err(DecodeError::mismatch($name, &other)),
                }
            }
        }
    };
}

macro_rules! decode_int {
    ($($ty:ty, $name:literal;)*) => {$(
        decode! {
            $ty, $name,
            Value::Int2(v) => v as $ty,
            Value::Int4(v) => v as $ty,
            Value::Int8(v) => v as $ty,
            Value::Float4(v) => v as i64 as $ty,
            Value::Float8(v) => v as i64 as $ty,
            Value::Numeric(v) => v.to_i64()? as $ty,
        }
    )*};
}

decode_int! {
    i16, "int2";
    i32, "int4";
    i64, "int8";
}

macro_rules! decode_float {
    ($($ty:ty, $name:literal;)*) => {$(
        decode! {
            $ty, $name,
            Value::Int2(v) => v as $ty,
            Value::Int4(v) => v as $ty,
            Value::Int8(v) => v as $ty,
            Value::Float4(v) => v as $ty,
            Value::Float8(v) => v as $ty,
            Value::Numeric(v) => v.to_f64() as $ty,
        }
    )*};
}

decode_float! {
    f32, "float4";
    f64, "float8";
}

decode!(bool, "bool", Value::Bool(v) => v);
decode!(String, "text", Value::Text(v) => v);
decode!(Bytes, "bytea", Value::Bytes(v) => v);
decode!(uuid::Uuid, "uuid", Value::Uuid(v) => v);

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the column position.
    fn position(self, desc: &RowDescriptor) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, desc: &RowDescriptor) -> Result<usize, DecodeError> {
        match self < desc.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    fn position(self, desc: &RowDescriptor) -> Result<usize, DecodeError> {
        desc.position(self)
            .ok_or_else(|| DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

unit_error! {
    /// An error when try to [`fetch_one`][crate::query::Query::fetch_one] and not returns any row.
    pub struct RowNotFound("row not found");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Value kind is not the one requested.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Value is null.
    Null,
    /// Numeric `NaN` requested as fixed precision number.
    NaN,
    /// Value does not follow its wire format.
    Malformed(Cow<'static,str>),
    /// Failed to deserialize using `serde_json`.
    Json(serde_json::Error),
}

impl DecodeError {
    pub(crate) fn malformed(reason: &'static str) -> DecodeError {
        DecodeError::Malformed(reason.into())
    }

    /// A NULL `found` is reported as [`DecodeError::Null`].
    pub(crate) fn mismatch(expected: &'static str, found: &Value) -> DecodeError {
        match found {
            Value::Null => DecodeError::Null,
            found => DecodeError::TypeMismatch { expected, found: found.type_name() },
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "data type missmatch, expected `{expected}` found `{found}`")
            }
            Self::Null => write!(f, "unexpected NULL value"),
            Self::NaN => write!(f, "numeric NaN cannot be represented"),
            Self::Malformed(reason) => write!(f, "{reason}"),
            Self::Json(e) => write!(f, "{e}"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
from!(<serde_json::Error>e => Self::Json(e));
from!(<ProtocolError>e => Self::Malformed(e.to_string().into()));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use crate::postgres::oid;

    fn descriptor(fields: &[(&str, Oid)]) -> Arc<RowDescriptor> {
        let mut body = BytesMut::new();
        for (name, oid) in fields {
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_u32(0);
            body.put_i16(0);
            body.put_u32(*oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_u16(1);
        }
        let desc = RowDescription { field_len: fields.len() as u16, body: body.freeze() };
        Arc::new(RowDescriptor::parse(desc).unwrap())
    }

    fn row(desc: Arc<RowDescriptor>, values: &[Option<&[u8]>]) -> Row {
        let mut body = BytesMut::new();
        for value in values {
            match value {
                Some(v) => {
                    body.put_i32(v.len() as i32);
                    body.put_slice(v);
                }
                None => body.put_i32(-1),
            }
        }
        Row::new(desc, DataRow { column_len: values.len() as u16, body: body.freeze() }).unwrap()
    }

    #[test]
    fn access_by_name_and_position() {
        let desc = descriptor(&[("id", oid::INT4), ("name", oid::TEXT), ("id", oid::INT8)]);
        let row = row(desc, &[Some(&7i32.to_be_bytes()), Some(b"foo"), None]);

        assert_eq!(row.try_get::<_, i32>("id").unwrap(), 7);
        assert_eq!(row.try_get::<_, String>(1).unwrap(), "foo");
        assert_eq!(row.try_get::<_, Option<i64>>(2).unwrap(), None);
        assert!(matches!(row.try_get::<_, i64>(2), Err(DecodeError::Null)));
        assert!(matches!(row.try_get::<_, i32>(3), Err(DecodeError::IndexOutOfBounds(3))));
        assert!(matches!(row.try_get::<_, i32>("nope"), Err(DecodeError::ColumnNotFound(_))));

        let (id, name) = row.decode::<(i16, String)>().unwrap();
        assert_eq!((id, name.as_str()), (7, "foo"));
    }

    #[test]
    fn mismatch_is_rejected() {
        let desc = descriptor(&[("name", oid::TEXT)]);
        let row = row(desc, &[Some(b"foo")]);
        let err = row.try_get::<_, i32>(0).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { expected: "int4", found: "text" }));
    }

    #[test]
    fn narrowing_truncates() {
        assert_eq!(i16::decode_value(Value::Int8(i64::MAX)).unwrap(), -1);
        assert_eq!(i32::decode_value(Value::Float8(3.9)).unwrap(), 3);
        assert_eq!(f32::decode_value(Value::Float8(f64::MAX)).unwrap(), f32::INFINITY);
        assert!(matches!(
            i64::decode_value(Value::Numeric(crate::types::Numeric::NaN)),
            Err(DecodeError::NaN)
        ));
    }

    proptest::proptest! {
        #[test]
        fn narrowing_matches_cast(v in proptest::num::i64::ANY) {
            proptest::prop_assert_eq!(i16::decode_value(Value::Int8(v)).unwrap(), v as i16);
            proptest::prop_assert_eq!(i32::decode_value(Value::Int8(v)).unwrap(), v as i32);
            proptest::prop_assert_eq!(i64::decode_value(Value::Int4(v as i32)).unwrap(), v as i32 as i64);
        }
    }

    #[test]
    fn column_count_mismatch() {
        let desc = descriptor(&[("a", oid::INT4)]);
        let data = DataRow { column_len: 2, body: Bytes::new() };
        assert!(Row::new(desc, data).is_err());
    }
}
