//! Arbitrary precision `numeric`.
use bytes::{Buf, BufMut, Bytes};
use std::{fmt, str::FromStr};

use crate::{
    encode::Encode,
    row::{Decode, DecodeError},
    types::Value,
};

/// Postgres `numeric` value.
///
/// Floating point `NaN` of any width converts into the single [`Numeric::NaN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Numeric {
    NaN,
    Infinity,
    NegInfinity,
    Decimal(Decimal),
}

/// Finite arbitrary precision decimal.
///
/// The value is `digits * 10^-scale`, negated if `negative`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    /// ascii digits, without leading zeros, `"0"` for zero
    digits: String,
    scale: u16,
}

impl Decimal {
    /// Zero with no fractional digits.
    pub fn zero() -> Decimal {
        Decimal { negative: false, digits: "0".into(), scale: 0 }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Number of digits after the decimal point.
    pub fn scale(&self) -> u16 {
        self.scale
    }

    /// Unscaled digits, without sign.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    fn new(negative: bool, mut digits: String, scale: u16) -> Decimal {
        let leading = digits.bytes().take_while(|e| *e == b'0').count();
        digits.drain(..leading);
        if digits.is_empty() {
            digits.push('0');
        }
        let negative = negative && digits != "0";
        Decimal { negative, digits, scale }
    }

    /// Integer part, truncated toward zero, wrapping on overflow.
    pub fn to_i64_wrapping(&self) -> i64 {
        let int_len = self.digits.len().saturating_sub(self.scale as usize);
        let value = self.digits.as_bytes()[..int_len]
            .iter()
            .fold(0i64, |acc, d| acc.wrapping_mul(10).wrapping_add((d - b'0') as i64));
        if self.negative { value.wrapping_neg() } else { value }
    }

    pub fn to_f64(&self) -> f64 {
        // always a valid float literal
        self.to_string().parse().unwrap_or(f64::NAN)
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        let mut buf = itoa::Buffer::new();
        Decimal::new(value < 0, buf.format(value.unsigned_abs()).into(), 0)
    }
}

impl FromStr for Decimal {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        let valid = |e: &str| e.bytes().all(|b| b.is_ascii_digit());
        if (int.is_empty() && frac.is_empty()) || !valid(int) || !valid(frac) {
            return Err(DecodeError::malformed("invalid numeric literal"));
        }
        let scale = u16::try_from(frac.len())
            .map_err(|_| DecodeError::malformed("numeric scale too large"))?;
        Ok(Decimal::new(negative, [int, frac].concat(), scale))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&self.digits);
        }
        if self.digits.len() > scale {
            let (int, frac) = self.digits.split_at(self.digits.len() - scale);
            write!(f, "{int}.{frac}")
        } else {
            write!(f, "0.{:0>scale$}", self.digits)
        }
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl Numeric {
    pub fn is_nan(&self) -> bool {
        matches!(self, Numeric::NaN)
    }

    /// Truncating integer conversion, `NaN` and infinity is an error.
    pub fn to_i64(&self) -> Result<i64, DecodeError> {
        match self {
            Numeric::Decimal(d) => Ok(d.to_i64_wrapping()),
            Numeric::NaN => Err(DecodeError::NaN),
            _ => Err(DecodeError::malformed("infinite numeric cannot be an integer")),
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Numeric::NaN => f64::NAN,
            Numeric::Infinity => f64::INFINITY,
            Numeric::NegInfinity => f64::NEG_INFINITY,
            Numeric::Decimal(d) => d.to_f64(),
        }
    }

    /// Decode `numeric` binary representation.
    ///
    /// ```text
    /// ndigits i16, weight i16, sign u16, dscale u16, digits [i16; ndigits] (base 10000)
    /// ```
    pub(crate) fn decode_binary(mut value: Bytes) -> Result<Numeric, DecodeError> {
        if value.remaining() < 8 {
            return Err(DecodeError::malformed("numeric header truncated"));
        }
        let ndigits = value.get_i16();
        let weight = value.get_i16() as i32;
        let sign = value.get_u16();
        let dscale = value.get_u16() as usize;

        let negative = match sign {
            0x0000 => false,
            0x4000 => true,
            0xC000 => return Ok(Numeric::NaN),
            0xD000 => return Ok(Numeric::Infinity),
            0xF000 => return Ok(Numeric::NegInfinity),
            _ => return Err(DecodeError::malformed("invalid numeric sign")),
        };
        if ndigits < 0 || value.remaining() < ndigits as usize * 2 {
            return Err(DecodeError::malformed("numeric digits truncated"));
        }
        let groups = (0..ndigits).map(|_| value.get_i16()).collect::<Vec<_>>();
        let group = |i: i32| match usize::try_from(i) {
            Ok(i) => groups.get(i).copied().unwrap_or(0),
            Err(_) => 0,
        };

        let mut digits = String::new();
        for i in 0..=weight.max(-1) {
            if i >= 0 {
                digits.push_str(&format!("{:04}", group(i)));
            }
        }
        let mut frac = String::new();
        let frac_groups = dscale.div_ceil(4) as i32;
        for m in 1..=frac_groups {
            frac.push_str(&format!("{:04}", group(weight + m)));
        }
        frac.truncate(dscale);
        digits.push_str(&frac);

        Ok(Numeric::Decimal(Decimal::new(negative, digits, dscale as u16)))
    }
}

impl Numeric {
    /// Encode `numeric` binary representation, see [`Numeric::decode_binary`].
    pub(crate) fn encode_binary(&self, buf: &mut impl BufMut) {
        let d = match self {
            Numeric::Decimal(d) => d,
            special => {
                let sign = match special {
                    Numeric::NaN => 0xC000,
                    Numeric::Infinity => 0xD000,
                    _ => 0xF000,
                };
                buf.put_i16(0);
                buf.put_i16(0);
                buf.put_u16(sign);
                buf.put_u16(0);
                return;
            }
        };

        let scale = d.scale as usize;
        let int_len = d.digits.len().saturating_sub(scale);
        let (int, frac) = d.digits.split_at(int_len);

        // align both parts to base 10000 groups around the decimal point
        let mut aligned = "0".repeat((4 - int.len() % 4) % 4);
        aligned.push_str(int);
        let mut weight = (aligned.len() / 4) as i32 - 1;
        aligned.push_str(&"0".repeat(scale - frac.len()));
        aligned.push_str(frac);
        aligned.push_str(&"0".repeat((4 - scale % 4) % 4));

        let mut groups = aligned
            .as_bytes()
            .chunks_exact(4)
            .map(|g| g.iter().fold(0i16, |acc, d| acc * 10 + (d - b'0') as i16))
            .collect::<Vec<_>>();

        let leading = groups.iter().take_while(|g| **g == 0).count();
        groups.drain(..leading);
        weight -= leading as i32;
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        buf.put_i16(groups.len() as i16);
        buf.put_i16(weight as i16);
        buf.put_u16(if d.negative { 0x4000 } else { 0x0000 });
        buf.put_u16(d.scale);
        for group in groups {
            buf.put_i16(group);
        }
    }
}

impl FromStr for Numeric {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NaN" => Ok(Numeric::NaN),
            "Infinity" | "+Infinity" => Ok(Numeric::Infinity),
            "-Infinity" => Ok(Numeric::NegInfinity),
            s => s.parse().map(Numeric::Decimal),
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::NaN => f.write_str("NaN"),
            Numeric::Infinity => f.write_str("Infinity"),
            Numeric::NegInfinity => f.write_str("-Infinity"),
            Numeric::Decimal(d) => d.fmt(f),
        }
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Numeric::NaN
        } else if value.is_infinite() {
            if value > 0.0 { Numeric::Infinity } else { Numeric::NegInfinity }
        } else {
            // rust float display never use exponent
            value.to_string().parse().map(Numeric::Decimal).unwrap_or(Numeric::NaN)
        }
    }
}

impl From<f32> for Numeric {
    fn from(value: f32) -> Self {
        if value.is_nan() {
            return Numeric::NaN;
        }
        if value.is_infinite() {
            return Numeric::from(value as f64);
        }
        value.to_string().parse().map(Numeric::Decimal).unwrap_or(Numeric::NaN)
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Numeric::Decimal(value.into())
    }
}

impl From<Decimal> for Numeric {
    fn from(value: Decimal) -> Self {
        Numeric::Decimal(value)
    }
}

impl Encode for Numeric {
    fn encode(self) -> Value {
        Value::Numeric(self)
    }
}

impl Encode for Decimal {
    fn encode(self) -> Value {
        Value::Numeric(Numeric::Decimal(self))
    }
}

impl Decode for Numeric {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Numeric(n) => Ok(n),
            Value::Int2(v) => Ok((v as i64).into()),
            Value::Int4(v) => Ok((v as i64).into()),
            Value::Int8(v) => Ok(v.into()),
            Value::Float4(v) => Ok(v.into()),
            Value::Float8(v) => Ok(v.into()),
            other => Err(DecodeError::mismatch("numeric", &other)),
        }
    }
}

impl Decode for Decimal {
    fn decode_value(value: Value) -> Result<Self, DecodeError> {
        match Numeric::decode_value(value)? {
            Numeric::Decimal(d) => Ok(d),
            Numeric::NaN => Err(DecodeError::NaN),
            _ => Err(DecodeError::malformed("infinite numeric cannot be a decimal")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn text_format() {
        let d = "-0012.3400".parse::<Decimal>().unwrap();
        assert!(d.is_negative());
        assert_eq!(d.scale(), 4);
        assert_eq!(d.to_string(), "-12.3400");

        assert_eq!("0.005".parse::<Decimal>().unwrap().to_string(), "0.005");
        assert_eq!("-0".parse::<Decimal>().unwrap(), Decimal::zero());
        assert!("1e5".parse::<Decimal>().is_err());
        assert!(".".parse::<Decimal>().is_err());
    }

    #[test]
    fn nan_is_canonical() {
        assert_eq!(Numeric::from(f64::NAN), Numeric::NaN);
        assert_eq!(Numeric::from(f32::NAN), Numeric::from(f64::NAN));
        assert!(Decimal::decode_value(Value::Numeric(Numeric::NaN)).is_err());
        assert!(Numeric::NaN.to_i64().is_err());
        assert!(Numeric::NaN.to_f64().is_nan());
    }

    #[test]
    fn truncating_integer() {
        let d = "98765.99".parse::<Decimal>().unwrap();
        assert_eq!(d.to_i64_wrapping(), 98765);
        let d = "-3.7".parse::<Decimal>().unwrap();
        assert_eq!(d.to_i64_wrapping(), -3);
    }

    #[test]
    fn binary_layout() {
        // 12345.678 => weight 1, groups [1, 2345, 6780], dscale 3
        let bytes = Bytes::from_static(&[
            0, 3, 0, 1, 0, 0, 0, 3,
            0, 1, 0x09, 0x29, 0x1a, 0x7c,
        ]);
        let n = Numeric::decode_binary(bytes).unwrap();
        assert_eq!(n.to_string(), "12345.678");

        // 0.0012 => weight -1, groups [12], dscale 4
        let bytes = Bytes::from_static(&[0, 1, 0xff, 0xff, 0x40, 0, 0, 4, 0, 12]);
        assert_eq!(Numeric::decode_binary(bytes).unwrap().to_string(), "-0.0012");

        let nan = Bytes::from_static(&[0, 0, 0, 0, 0xc0, 0, 0, 0]);
        assert_eq!(Numeric::decode_binary(nan).unwrap(), Numeric::NaN);
    }

    fn encoded(n: &Numeric) -> Vec<u8> {
        let mut buf = Vec::new();
        n.encode_binary(&mut buf);
        buf
    }

    #[test]
    fn binary_encode_layout() {
        let n = "12345.678".parse::<Numeric>().unwrap();
        assert_eq!(encoded(&n), [0, 3, 0, 1, 0, 0, 0, 3, 0, 1, 0x09, 0x29, 0x1a, 0x7c]);

        let n = "-0.0012".parse::<Numeric>().unwrap();
        assert_eq!(encoded(&n), [0, 1, 0xff, 0xff, 0x40, 0, 0, 4, 0, 12]);

        // leading zero group is dropped from the fraction
        let n = "0.00001".parse::<Numeric>().unwrap();
        assert_eq!(encoded(&n), [0, 1, 0xff, 0xfe, 0, 0, 0, 5, 0x03, 0xe8]);

        // trailing zero groups are dropped
        let n = "20000".parse::<Numeric>().unwrap();
        assert_eq!(encoded(&n), [0, 1, 0, 1, 0, 0, 0, 0, 0, 2]);

        let zero = "0.00".parse::<Numeric>().unwrap();
        assert_eq!(encoded(&zero), [0, 0, 0, 0, 0, 0, 0, 2]);

        assert_eq!(encoded(&Numeric::NaN), [0, 0, 0, 0, 0xc0, 0, 0, 0]);
        assert_eq!(encoded(&Numeric::Infinity), [0, 0, 0, 0, 0xd0, 0, 0, 0]);
        assert_eq!(encoded(&Numeric::NegInfinity), [0, 0, 0, 0, 0xf0, 0, 0, 0]);
    }

    #[test]
    fn binary_special_roundtrip() {
        for n in [Numeric::NaN, Numeric::Infinity, Numeric::NegInfinity] {
            assert_eq!(Numeric::decode_binary(encoded(&n).into()).unwrap(), n);
        }
    }

    proptest::proptest! {
        #[test]
        fn binary_roundtrip(negative: bool, digits in "[0-9]{1,40}", scale in 0u16..48) {
            let n = Numeric::Decimal(Decimal::new(negative, digits, scale));
            let decoded = Numeric::decode_binary(encoded(&n).into()).unwrap();
            proptest::prop_assert_eq!(decoded, n);
        }
    }
}
