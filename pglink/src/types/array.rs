//! One dimensional array framing.
//!
//! Element values are encoded by the caller, this module only deals with
//! the array header and element separation.
use bytes::{Buf, BufMut, Bytes};

use crate::{ext::UsizeExt, postgres::Oid, row::DecodeError};

/// Binary array layout:
///
/// ```text
/// ndim i32, has_null i32, elem oid u32, (len i32, lower bound i32) * ndim, (len i32, [u8]) * n
/// ```
pub(crate) fn decode_binary(mut value: Bytes) -> Result<(Oid, Vec<Option<Bytes>>), DecodeError> {
    let truncated = || DecodeError::malformed("array truncated");
    if value.remaining() < 12 {
        return Err(truncated());
    }
    let ndim = value.get_i32();
    let _has_null = value.get_i32();
    let elem = value.get_u32();

    let len = match ndim {
        0 => return Ok((elem, vec![])),
        1 => {
            if value.remaining() < 8 {
                return Err(truncated());
            }
            let len = value.get_i32();
            let _lower_bound = value.get_i32();
            usize::try_from(len).map_err(|_| DecodeError::malformed("negative array length"))?
        }
        _ => return Err(DecodeError::malformed("multi-dimensional arrays are not supported")),
    };

    let mut elements = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        if value.remaining() < 4 {
            return Err(truncated());
        }
        let element = match value.get_i32() {
            n if n < 0 => None,
            n if n as usize > value.remaining() => return Err(truncated()),
            n => Some(value.split_to(n as usize)),
        };
        elements.push(element);
    }
    Ok((elem, elements))
}

pub(crate) fn encode_binary(elem: Oid, elements: &[Option<Bytes>], buf: &mut impl BufMut) {
    if elements.is_empty() {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u32(elem);
        return;
    }
    buf.put_i32(1);
    buf.put_i32(elements.iter().any(Option::is_none) as i32);
    buf.put_u32(elem);
    buf.put_i32(elements.len().to_u32() as i32);
    buf.put_i32(1);
    for element in elements {
        match element {
            Some(e) => {
                buf.put_i32(e.len().to_u32() as i32);
                buf.put_slice(e);
            }
            None => buf.put_i32(-1),
        }
    }
}

/// Split text array literal into its raw elements, `None` for unquoted `NULL`.
pub(crate) fn decode_text(s: &str, delimiter: char) -> Result<Vec<Option<String>>, DecodeError> {
    // optional dimension decoration, `[1:3]={...}`
    let s = match s.strip_prefix('[') {
        Some(_) => s.split_once('=').map(|e| e.1).unwrap_or(s),
        None => s,
    };
    let Some(body) = s.trim().strip_prefix('{').and_then(|e| e.strip_suffix('}')) else {
        return Err(DecodeError::malformed("array literal not enclosed in braces"));
    };

    let mut elements = vec![];
    let mut chars = body.chars().peekable();

    if body.trim().is_empty() {
        return Ok(elements);
    }

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut element = String::new();
        let mut quoted = false;
        match chars.peek() {
            Some('{') => {
                return Err(DecodeError::malformed("multi-dimensional arrays are not supported"));
            }
            Some('"') => {
                quoted = true;
                chars.next();
                loop {
                    match chars.next() {
                        Some('\\') => element.extend(chars.next()),
                        Some('"') => break,
                        Some(c) => element.push(c),
                        None => return Err(DecodeError::malformed("unterminated quoted array element")),
                    }
                }
                while chars.next_if(|c| c.is_whitespace()).is_some() {}
            }
            _ => {
                while let Some(c) = chars.next_if(|c| *c != delimiter) {
                    match c {
                        '\\' => element.extend(chars.next()),
                        c => element.push(c),
                    }
                }
                element.truncate(element.trim_end().len());
            }
        }

        match !quoted && element.eq_ignore_ascii_case("NULL") {
            true => elements.push(None),
            false => elements.push(Some(element)),
        }

        match chars.next() {
            Some(c) if c == delimiter => continue,
            None => break,
            Some(_) => return Err(DecodeError::malformed("unexpected character in array literal")),
        }
    }

    Ok(elements)
}

/// Write text array literal, quoting elements as needed.
pub(crate) fn encode_text<'a>(
    elements: impl IntoIterator<Item = Option<&'a str>>,
    delimiter: char,
    out: &mut String,
) {
    out.push('{');
    for (i, element) in elements.into_iter().enumerate() {
        if i != 0 {
            out.push(delimiter);
        }
        let Some(element) = element else {
            out.push_str("NULL");
            continue;
        };
        let quote = element.is_empty()
            || element.eq_ignore_ascii_case("NULL")
            || element.chars().any(|c| {
                c == delimiter || matches!(c, '"' | '\\' | '{' | '}') || c.is_whitespace()
            });
        if !quote {
            out.push_str(element);
            continue;
        }
        out.push('"');
        for c in element.chars() {
            if matches!(c, '"' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }
    out.push('}');
}
