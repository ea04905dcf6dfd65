// Cantus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The bencode wire format spoken by session clients.
//!
//! Bencode has four kinds of values: integers (`i42e`), byte strings (`5:hello`), lists
//! (`l...e`) and dictionaries (`d...e`). Dictionary keys are byte strings; this implementation
//! requires them to be UTF-8 and always encodes them in sorted order.
//!
//! # Examples
//!
//! ```
//! use cantus::bencode::{self, Value};
//! use std::collections::BTreeMap;
//!
//! let mut message = BTreeMap::new();
//! message.insert("op".to_owned(), Value::from("describe"));
//! message.insert("id".to_owned(), Value::Int(1));
//!
//! let encoded = bencode::encode(&Value::Dict(message.clone()));
//! assert_eq!(encoded, b"d2:idi1e2:op8:describee".to_vec());
//!
//! let decoded = bencode::Decoder::new(&encoded[..]).decode_next().unwrap();
//! assert_eq!(decoded, Some(Value::Dict(message)));
//! ```

use std::collections::BTreeMap;

pub mod decoder;
pub mod encoder;

pub use decoder::{Decoder, Error};
pub use encoder::encode;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the value as a string if it is a UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Bytes(s.into_bytes())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Value {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(dict: BTreeMap<String, Value>) -> Value {
        Value::Dict(dict)
    }
}
