// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenPlanet.

// OpenPlanet is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenPlanet is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenPlanet.  If not, see <http://www.gnu.org/licenses/>.

//! Canonical value codec.
//!
//! Every logical value has exactly one encoding: dictionary keys are
//! sorted (binary keys before text keys, each byte-wise ascending),
//! integers are rendered in minimal decimal form, and byte/text atoms
//! are length-prefixed. Two equal values therefore encode to identical
//! byte strings on every implementation, which is what block and
//! transaction hashing relies on.

use parity_bytes::Bytes;
use std::{collections::BTreeMap, error, fmt, str};

/// A dictionary key. Binary keys order before text keys; within a kind
/// keys order byte-wise ascending.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    /// Raw byte-string key, encoded as `{len}:{bytes}`.
    Binary(Vec<u8>),
    /// UTF-8 text key, encoded as `u{len}:{bytes}`.
    Text(String),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.into())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Binary(b)
    }
}

/// A value expressible in the canonical codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Encoded as `n`.
    Null,
    /// Encoded as `t` or `f`.
    Boolean(bool),
    /// Encoded as `i{decimal}e`, sign-prefixed when negative.
    Integer(i128),
    /// Encoded as `{len}:{bytes}`.
    Binary(Vec<u8>),
    /// Encoded as `u{len}:{utf8}`; the length counts bytes, not chars.
    Text(String),
    /// Encoded as `l…e`, order-preserving.
    List(Vec<Value>),
    /// Encoded as `d…e` with keys in canonical order.
    Dictionary(BTreeMap<Key, Value>),
}

impl Value {
    /// Serialize into the canonical byte string.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(b'n'),
            Value::Boolean(true) => out.push(b't'),
            Value::Boolean(false) => out.push(b'f'),
            Value::Integer(i) => {
                out.push(b'i');
                out.extend_from_slice(i.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Binary(b) => encode_binary(b, out),
            Value::Text(t) => encode_text(t, out),
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dictionary(map) => {
                out.push(b'd');
                for (key, value) in map {
                    match key {
                        Key::Binary(b) => encode_binary(b, out),
                        Key::Text(t) => encode_text(t, out),
                    }
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Parse a canonical byte string. The whole input must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Value, DecoderError> {
        let mut parser = Parser { input: bytes, offset: 0 };
        let value = parser.value()?;
        if parser.offset != bytes.len() {
            return Err(DecoderError::TrailingData { offset: parser.offset });
        }
        Ok(value)
    }

    /// The integer payload, if this is an integer.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The byte-string payload, if this is a binary atom.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The text payload, if this is a text atom.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// The item slice, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The underlying map, if this is a dictionary.
    pub fn as_dictionary(&self) -> Option<&BTreeMap<Key, Value>> {
        match self {
            Value::Dictionary(map) => Some(map),
            _ => None,
        }
    }

    /// Dictionary lookup by text key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dictionary()
            .and_then(|map| map.get(&Key::Text(key.into())))
    }
}

fn encode_binary(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn encode_text(text: &str, out: &mut Vec<u8>) {
    out.push(b'u');
    out.extend_from_slice(text.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(text.as_bytes());
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i as i128)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Integer(i as i128)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<Key, Value>> for Value {
    fn from(map: BTreeMap<Key, Value>) -> Self {
        Value::Dictionary(map)
    }
}

/// Decoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    /// Input ended inside a value.
    UnexpectedEof,
    /// A byte that cannot begin or continue a value at this position.
    UnexpectedByte {
        /// The offending byte.
        byte: u8,
        /// Its offset in the input.
        offset: usize,
    },
    /// A length prefix that is empty, has leading zeros, or overflows.
    InvalidLength { offset: usize },
    /// An integer payload that is empty or not in minimal decimal form.
    InvalidInteger { offset: usize },
    /// A text atom whose payload is not valid UTF-8.
    InvalidUtf8 { offset: usize },
    /// Well-formed value followed by leftover bytes.
    TrailingData { offset: usize },
    /// A well-formed value that does not match the expected record shape.
    Custom(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecoderError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecoderError::UnexpectedByte { byte, offset } => {
                write!(f, "unexpected byte {byte:#04x} at offset {offset}")
            }
            DecoderError::InvalidLength { offset } => {
                write!(f, "invalid length prefix at offset {offset}")
            }
            DecoderError::InvalidInteger { offset } => {
                write!(f, "invalid integer at offset {offset}")
            }
            DecoderError::InvalidUtf8 { offset } => {
                write!(f, "invalid UTF-8 text at offset {offset}")
            }
            DecoderError::TrailingData { offset } => {
                write!(f, "trailing data at offset {offset}")
            }
            DecoderError::Custom(message) => write!(f, "{message}"),
        }
    }
}

impl error::Error for DecoderError {}

struct Parser<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, DecoderError> {
        self.input
            .get(self.offset)
            .copied()
            .ok_or(DecoderError::UnexpectedEof)
    }

    fn bump(&mut self) -> Result<u8, DecoderError> {
        let byte = self.peek()?;
        self.offset += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecoderError> {
        if self.input.len() - self.offset < len {
            return Err(DecoderError::UnexpectedEof);
        }
        let slice = &self.input[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn value(&mut self) -> Result<Value, DecoderError> {
        match self.peek()? {
            b'n' => {
                self.offset += 1;
                Ok(Value::Null)
            }
            b't' => {
                self.offset += 1;
                Ok(Value::Boolean(true))
            }
            b'f' => {
                self.offset += 1;
                Ok(Value::Boolean(false))
            }
            b'i' => {
                self.offset += 1;
                self.integer()
            }
            b'u' => {
                self.offset += 1;
                Ok(Value::Text(self.text()?))
            }
            b'0'..=b'9' => Ok(Value::Binary(self.binary()?)),
            b'l' => {
                self.offset += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.offset += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.offset += 1;
                self.dictionary()
            }
            byte => Err(DecoderError::UnexpectedByte { byte, offset: self.offset }),
        }
    }

    fn integer(&mut self) -> Result<Value, DecoderError> {
        let start = self.offset;
        let mut digits = Vec::new();
        loop {
            match self.bump()? {
                b'e' => break,
                byte => digits.push(byte),
            }
        }
        let text =
            str::from_utf8(&digits).map_err(|_| DecoderError::InvalidInteger { offset: start })?;
        let canonical = text == "0"
            || (!text.starts_with('0')
                && !text.starts_with('+')
                && !text.starts_with("-0")
                && text.len() > text.starts_with('-') as usize);
        if !canonical {
            return Err(DecoderError::InvalidInteger { offset: start });
        }
        let parsed = text
            .parse::<i128>()
            .map_err(|_| DecoderError::InvalidInteger { offset: start })?;
        Ok(Value::Integer(parsed))
    }

    fn length(&mut self) -> Result<usize, DecoderError> {
        let start = self.offset;
        let mut digits = Vec::new();
        loop {
            match self.bump()? {
                b':' => break,
                byte @ b'0'..=b'9' => digits.push(byte),
                byte => return Err(DecoderError::UnexpectedByte { byte, offset: self.offset - 1 }),
            }
        }
        if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
            return Err(DecoderError::InvalidLength { offset: start });
        }
        // Guaranteed ASCII digits at this point.
        str::from_utf8(&digits)
            .expect("digits are ASCII")
            .parse::<usize>()
            .map_err(|_| DecoderError::InvalidLength { offset: start })
    }

    fn binary(&mut self) -> Result<Vec<u8>, DecoderError> {
        let len = self.length()?;
        Ok(self.take(len)?.to_vec())
    }

    fn text(&mut self) -> Result<String, DecoderError> {
        let start = self.offset;
        let len = self.length()?;
        let bytes = self.take(len)?;
        str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| DecoderError::InvalidUtf8 { offset: start })
    }

    fn dictionary(&mut self) -> Result<Value, DecoderError> {
        let mut map = BTreeMap::new();
        loop {
            let key = match self.peek()? {
                b'e' => {
                    self.offset += 1;
                    return Ok(Value::Dictionary(map));
                }
                b'u' => {
                    self.offset += 1;
                    Key::Text(self.text()?)
                }
                b'0'..=b'9' => Key::Binary(self.binary()?),
                byte => return Err(DecoderError::UnexpectedByte { byte, offset: self.offset }),
            };
            let value = self.value()?;
            map.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: Vec<(Key, Value)>) -> Value {
        Value::Dictionary(pairs.into_iter().collect())
    }

    #[test]
    fn encodes_atoms() {
        assert_eq!(Value::Null.encode(), b"n");
        assert_eq!(Value::Boolean(true).encode(), b"t");
        assert_eq!(Value::Boolean(false).encode(), b"f");
        assert_eq!(Value::Integer(0).encode(), b"i0e");
        assert_eq!(Value::Integer(123).encode(), b"i123e");
        assert_eq!(Value::Integer(-45).encode(), b"i-45e");
        assert_eq!(Value::Binary(b"spam".to_vec()).encode(), b"4:spam");
        assert_eq!(Value::Binary(vec![]).encode(), b"0:");
        assert_eq!(Value::Text("hello".into()).encode(), b"u5:hello");
    }

    #[test]
    fn text_length_counts_bytes() {
        // U+00E9 is two bytes in UTF-8.
        assert_eq!(Value::Text("\u{e9}".into()).encode(), "u2:\u{e9}".as_bytes());
    }

    #[test]
    fn encodes_containers() {
        let list = Value::List(vec![Value::Integer(1), Value::Text("a".into())]);
        assert_eq!(list.encode(), b"li1eu1:ae");

        let d = dict(vec![
            (Key::Text("b".into()), Value::Integer(2)),
            (Key::Text("a".into()), Value::Integer(1)),
        ]);
        assert_eq!(d.encode(), b"du1:ai1eu1:bi2ee");
    }

    #[test]
    fn binary_keys_order_before_text_keys() {
        let d = dict(vec![
            (Key::Text("a".into()), Value::Integer(1)),
            (Key::Binary(b"z".to_vec()), Value::Integer(2)),
        ]);
        assert_eq!(d.encode(), b"d1:zi2eu1:ai1ee");
    }

    #[test]
    fn equal_values_encode_identically() {
        let a = dict(vec![
            (Key::Text("x".into()), Value::Integer(1)),
            (Key::Text("y".into()), Value::Integer(2)),
        ]);
        let b = dict(vec![
            (Key::Text("y".into()), Value::Integer(2)),
            (Key::Text("x".into()), Value::Integer(1)),
        ]);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn round_trips() {
        let value = dict(vec![
            (Key::Text("null".into()), Value::Null),
            (Key::Text("flag".into()), Value::Boolean(false)),
            (Key::Text("n".into()), Value::Integer(-99)),
            (Key::Binary(vec![0, 1, 2]), Value::Binary(vec![0xff; 40])),
            (
                Key::Text("list".into()),
                Value::List(vec![Value::Integer(7), Value::Text("seven".into())]),
            ),
        ]);
        assert_eq!(Value::decode(&value.encode()), Ok(value));
    }

    #[test]
    fn rejects_trailing_data() {
        assert_eq!(
            Value::decode(b"i1en"),
            Err(DecoderError::TrailingData { offset: 3 })
        );
    }

    #[test]
    fn rejects_truncation() {
        assert_eq!(Value::decode(b"4:spa"), Err(DecoderError::UnexpectedEof));
        assert_eq!(Value::decode(b"li1e"), Err(DecoderError::UnexpectedEof));
        assert_eq!(Value::decode(b"i12"), Err(DecoderError::UnexpectedEof));
    }

    #[test]
    fn rejects_non_minimal_integers() {
        assert_eq!(
            Value::decode(b"i01e"),
            Err(DecoderError::InvalidInteger { offset: 1 })
        );
        assert_eq!(
            Value::decode(b"i-0e"),
            Err(DecoderError::InvalidInteger { offset: 1 })
        );
        assert_eq!(
            Value::decode(b"i+1e"),
            Err(DecoderError::InvalidInteger { offset: 1 })
        );
        assert_eq!(
            Value::decode(b"ie"),
            Err(DecoderError::InvalidInteger { offset: 1 })
        );
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(
            Value::decode(b"04:spam"),
            Err(DecoderError::InvalidLength { offset: 0 })
        );
        assert_eq!(
            Value::decode(b"u2:\xff\xff"),
            Err(DecoderError::InvalidUtf8 { offset: 1 })
        );
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert_eq!(
            Value::decode(b"x"),
            Err(DecoderError::UnexpectedByte { byte: b'x', offset: 0 })
        );
    }
}
