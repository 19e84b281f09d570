//! Data model shared by the store and the wire protocol.

use std::io::Cursor;

use crate::errors::ProtocolError;
use crate::wire::{get_f64, get_i32, get_string, get_u8, put_string};
use crate::Serializable;

/// One traffic-crash fact. All string fields are free text as loaded from
/// the source dataset; numeric fields default to zero when the source cell
/// is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CrashRecord {
    pub date: String,
    pub time: String,
    pub borough: String,
    pub zip: String,
    pub lat: f64,
    pub lon: f64,
    pub location: String,
    pub on_street: String,
    pub cross_street: String,
    pub off_street: String,
    pub injured: i32,
    pub killed: i32,
    pub pedestrians: i32,
}

impl CrashRecord {
    /// The reduced form a crash record takes when it crosses the wire as a
    /// string value.
    pub fn wire_summary(&self) -> String {
        format!(
            "Date: {}, Time: {}, Borough: {}, Killed: {}",
            self.date, self.time, self.borough, self.killed
        )
    }
}

/// A tagged value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Int32(i32),
    Float64(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Crash(CrashRecord),
}

const TAG_STRING: u8 = 0x01;
const TAG_INT32: u8 = 0x02;
const TAG_FLOAT64: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;

impl DataValue {
    /// The string form this value takes on the wire when its native variant
    /// has no wire tag: crash records become their summary line, raw bytes
    /// become lowercase hex.
    pub fn wire_string(&self) -> Option<String> {
        match self {
            DataValue::Crash(record) => Some(record.wire_summary()),
            DataValue::Bytes(data) => {
                Some(data.iter().map(|b| format!("{:02x}", b)).collect())
            }
            _ => None,
        }
    }
}

/// A keyed, timestamped value. The timestamp is local bookkeeping and does
/// not travel on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    pub key: String,
    pub value: DataValue,
    pub timestamp: i64,
}

impl DataEntry {
    pub fn new(key: impl Into<String>, value: DataValue, timestamp: i64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }
}

impl Serializable for DataEntry {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// |      key_len      |
    /// +----+----+----+----+
    /// |        key        |
    /// +----+----+----+----+
    /// |tag |    value
    /// +----+----+----+----+
    /// ```
    /// Serializes the entry into a byte vector. Variants without a wire tag
    /// are downgraded to strings first.
    fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_string(&mut bytes, &self.key);

        match &self.value {
            DataValue::Int32(n) => {
                bytes.push(TAG_INT32);
                bytes.extend(&n.to_be_bytes());
            }
            DataValue::Float64(x) => {
                bytes.push(TAG_FLOAT64);
                bytes.extend(&x.to_be_bytes());
            }
            DataValue::Bool(b) => {
                bytes.push(TAG_BOOL);
                bytes.push(*b as u8);
            }
            DataValue::Text(s) => {
                bytes.push(TAG_STRING);
                put_string(&mut bytes, s);
            }
            other => {
                let downgraded = other
                    .wire_string()
                    .unwrap_or_default();
                bytes.push(TAG_STRING);
                put_string(&mut bytes, &downgraded);
            }
        }

        bytes
    }

    /// Deserializes an entry from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(bytes);
        Self::read(&mut cursor)
    }
}

impl DataEntry {
    pub(crate) fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, ProtocolError> {
        let key = get_string(cursor)?;
        let tag = get_u8(cursor)?;

        let value = match tag {
            TAG_STRING => DataValue::Text(get_string(cursor)?),
            TAG_INT32 => DataValue::Int32(get_i32(cursor)?),
            TAG_FLOAT64 => DataValue::Float64(get_f64(cursor)?),
            TAG_BOOL => DataValue::Bool(get_u8(cursor)? != 0),
            other => return Err(ProtocolError::InvalidTag(other)),
        };

        Ok(DataEntry {
            key,
            value,
            timestamp: 0,
        })
    }
}
