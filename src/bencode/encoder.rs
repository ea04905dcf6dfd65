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

//! Serializes [`Value`]s into bencode.

use super::Value;

/// Encodes a value. Dictionary keys are written in sorted order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buffer = Vec::new();
    write_value(&mut buffer, value);
    buffer
}

fn write_value(w: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(n) => write_int(w, *n),
        Value::Bytes(bytes) => write_bytes(w, bytes),
        Value::List(values) => {
            w.push(b'l');
            for value in values {
                write_value(w, value);
            }
            w.push(b'e');
        }
        Value::Dict(dict) => {
            w.push(b'd');
            for (key, value) in dict {
                write_bytes(w, key.as_bytes());
                write_value(w, value);
            }
            w.push(b'e');
        }
    }
}

fn write_int(w: &mut Vec<u8>, n: i64) {
    w.push(b'i');
    w.extend_from_slice(n.to_string().as_bytes());
    w.push(b'e');
}

fn write_bytes(w: &mut Vec<u8>, bytes: &[u8]) {
    w.extend_from_slice(bytes.len().to_string().as_bytes());
    w.push(b':');
    w.extend_from_slice(bytes);
}
