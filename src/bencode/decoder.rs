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

//! Reads [`Value`]s from a stream of bencode.
//!
//! The decoder reads one byte at a time, so it should be given a buffered reader when reading
//! from a socket.

use super::Value;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Read},
};

// Byte strings longer than this are rejected before anything is allocated.
const MAX_BYTES_LEN: usize = 16 * 1024 * 1024;

// Lists and dictionaries nested deeper than this are rejected.
const MAX_DEPTH: usize = 64;

// Enough digits for any i64, with its sign.
const MAX_INT_DIGITS: usize = 20;

/// Decodes consecutive values from a byte stream.
pub struct Decoder<R: Read> {
    read: R,
    peeked: Option<u8>,
}

impl<R: Read> Decoder<R> {
    pub fn new(read: R) -> Decoder<R> {
        Decoder { read, peeked: None }
    }

    /// Decodes the next value from the stream.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between two values.
    ///
    /// # Errors
    ///
    /// * Returns [`Error::IO`] if reading the stream fails.
    /// * Returns [`Error::UnexpectedEof`] if the stream ends in the middle of a value.
    /// * Returns [`Error::UnexpectedByte`], [`Error::BadInteger`], [`Error::BadKey`],
    ///   [`Error::TooLong`], [`Error::IntegerTooLong`] or [`Error::TooDeep`] if the stream is
    ///   not valid bencode or is beyond the decoder's limits.
    pub fn decode_next(&mut self) -> Result<Option<Value>> {
        match self.peek_byte()? {
            None => Ok(None),
            Some(_) => self.scan_value(0).map(Some),
        }
    }

    fn scan_value(&mut self, depth: usize) -> Result<Value> {
        match self.expect_peek()? {
            b'l' | b'd' if depth >= MAX_DEPTH => Err(Error::TooDeep(MAX_DEPTH)),
            b'i' => {
                self.scan_byte()?;
                let n = self.scan_until(b'e')?;
                parse_int(&n).map(Value::Int)
            }
            b'l' => {
                self.scan_byte()?;
                let mut values = Vec::new();
                while self.expect_peek()? != b'e' {
                    values.push(self.scan_value(depth + 1)?);
                }
                self.scan_byte()?;
                Ok(Value::List(values))
            }
            b'd' => {
                self.scan_byte()?;
                let mut dict = BTreeMap::new();
                while self.expect_peek()? != b'e' {
                    let key = String::from_utf8(self.scan_bytes()?).map_err(|_| Error::BadKey)?;
                    let value = self.scan_value(depth + 1)?;
                    dict.insert(key, value);
                }
                self.scan_byte()?;
                Ok(Value::Dict(dict))
            }
            b'0'..=b'9' => self.scan_bytes().map(Value::Bytes),
            byte => Err(Error::UnexpectedByte(byte)),
        }
    }

    fn scan_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.scan_until(b':')?;
        let len = parse_int(&len)?;
        if len < 0 {
            return Err(Error::BadInteger(len.to_string()));
        }
        let len = len as usize;
        if len > MAX_BYTES_LEN {
            return Err(Error::TooLong(len));
        }

        // scan_until consumed the peeked byte, so the rest comes straight from the reader.
        let mut buf = vec![0; len];
        self.read.read_exact(&mut buf).map_err(eof)?;
        Ok(buf)
    }

    // Consumes bytes up to and including the terminator, returning the ones before it.
    fn scan_until(&mut self, terminator: u8) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.scan_byte()?;
            if byte == terminator {
                return Ok(bytes);
            }
            if bytes.len() >= MAX_INT_DIGITS {
                return Err(Error::IntegerTooLong(MAX_INT_DIGITS));
            }
            bytes.push(byte);
        }
    }

    fn scan_byte(&mut self) -> Result<u8> {
        match self.peeked.take() {
            Some(byte) => Ok(byte),
            None => {
                let mut buf: [u8; 1] = [0; 1];
                self.read.read_exact(&mut buf).map_err(eof)?;
                Ok(buf[0])
            }
        }
    }

    fn expect_peek(&mut self) -> Result<u8> {
        self.peek_byte()?.ok_or(Error::UnexpectedEof)
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            let mut buf: [u8; 1] = [0; 1];
            loop {
                match self.read.read(&mut buf) {
                    Ok(0) => return Ok(None),
                    Ok(_) => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(Error::IO(err)),
                }
            }
            self.peeked = Some(buf[0]);
        }
        Ok(self.peeked)
    }
}

fn eof(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::UnexpectedEof
    } else {
        Error::IO(err)
    }
}

fn parse_int(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::BadInteger(String::from_utf8_lossy(bytes).into_owned()))
}

type Result<T> = std::result::Result<T, Error>;

/// The error type of decoding operations.
#[derive(Debug)]
pub enum Error {
    /// The stream ended in the middle of a value.
    UnexpectedEof,

    /// A byte that cannot start a value was found where a value was expected.
    UnexpectedByte(u8),

    /// An integer or a byte string length could not be parsed.
    BadInteger(String),

    /// A dictionary key was not valid UTF-8.
    BadKey,

    /// A byte string was longer than the decoder accepts.
    TooLong(usize),

    /// An integer or a byte string length had more digits than any 64-bit integer.
    IntegerTooLong(usize),

    /// Lists and dictionaries were nested deeper than the decoder accepts.
    TooDeep(usize),

    /// An I/O error that occurred while reading the stream.
    IO(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnexpectedEof => write!(f, "unexpected end of stream"),
            Error::UnexpectedByte(byte) => write!(f, "unexpected byte: {:?}", *byte as char),
            Error::BadInteger(s) => write!(f, "bad integer: {:?}", s),
            Error::BadKey => write!(f, "dictionary key is not valid utf-8"),
            Error::TooLong(len) => write!(f, "byte string too long: {} bytes", len),
            Error::IntegerTooLong(max) => write!(f, "integer longer than {} characters", max),
            Error::TooDeep(max) => write!(f, "nested more than {} levels deep", max),
            Error::IO(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}
