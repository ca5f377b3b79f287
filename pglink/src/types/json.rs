use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    encode::Encode,
    row::{Decode, DecodeError},
    types::Value,
};

/// Decode and Encode postgres json value.
///
/// # Panics
///
/// Note that when performing [`Encode`], if [`Serialize`] implementation decide
/// to fail, it will will panics.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> Decode for Json<T> {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Json(json) => serde_json::from_value(json).map(Json).map_err(Into::into),
            other => Err(DecodeError::mismatch("json", &other)),
        }
    }
}

impl<T: Serialize> Encode for Json<T> {
    fn encode(self) -> Value {
        match serde_json::to_value(&self.0) {
            Ok(json) => Value::Json(json),
            Err(err) => panic!("failed to serialize json parameter: {err}"),
        }
    }
}

impl Encode for serde_json::Value {
    fn encode(self) -> Value {
        Value::Json(self)
    }
}

impl Decode for serde_json::Value {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Json(json) => Ok(json),
            other => Err(DecodeError::mismatch("json", &other)),
        }
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_is_distinct_from_absent() {
        let json = Value::Json(serde_json::Value::Null);
        let decoded = Option::<serde_json::Value>::decode_value(json).unwrap();
        assert_eq!(decoded, Some(serde_json::Value::Null));

        let decoded = Option::<serde_json::Value>::decode_value(Value::Null).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn typed_json() {
        let value = Json(vec![1, 2, 3]).encode();
        let Json(back) = Json::<Vec<i32>>::decode_value(value).unwrap();
        assert_eq!(back, [1, 2, 3]);
    }
}
