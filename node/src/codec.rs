//! Cache encodings for query results.
//!
//! Intermediate nodes memoize a result as one `<key>,<type>,<value>` line
//! per entry. The portal prefixes a `<success>,<message>,<count>` header
//! and joins everything with commas into a single image. Crash records are
//! deliberately reduced to a `CrashData:<key>` placeholder: the cache
//! answers "which rows", not "what was in them", and clients must not rely
//! on recovering a record from a cached result.

use std::fmt::{self, Display};

use overlay_protocol::messages::response::QueryResponse;
use overlay_protocol::types::{DataEntry, DataValue};

#[derive(Debug)]
pub enum CodecError {
    Malformed(String),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Malformed(msg) => write!(f, "malformed cached result: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

/// A result decoded back out of the cache. Timing never round-trips; a
/// cache hit gets fresh timing from the serving node.
#[derive(Debug, PartialEq)]
pub struct CachedResult {
    pub success: bool,
    pub message: String,
    pub entries: Vec<DataEntry>,
}

/// Which on-cache encoding a node speaks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheCodec {
    /// One `<key>,<type>,<value>` line per entry.
    Plain,
    /// `<success>,<message>,<count>[,<key>,<type>,<value>]*` in one image.
    HeaderPrefixed,
}

fn value_fields(entry: &DataEntry) -> (&'static str, String) {
    match &entry.value {
        DataValue::Int32(n) => ("int", n.to_string()),
        DataValue::Float64(x) => ("double", x.to_string()),
        DataValue::Bool(b) => ("bool", b.to_string()),
        DataValue::Text(s) => ("string", s.clone()),
        DataValue::Crash(_) => ("string", format!("CrashData:{}", entry.key)),
        DataValue::Bytes(_) => (
            "string",
            entry.value.wire_string().unwrap_or_default(),
        ),
    }
}

fn parse_value(kind: &str, raw: &str) -> Result<DataValue, CodecError> {
    match kind {
        "int" => raw
            .parse()
            .map(DataValue::Int32)
            .map_err(|_| CodecError::Malformed(format!("bad int value: {}", raw))),
        "double" => raw
            .parse()
            .map(DataValue::Float64)
            .map_err(|_| CodecError::Malformed(format!("bad double value: {}", raw))),
        "bool" => match raw {
            "true" => Ok(DataValue::Bool(true)),
            "false" => Ok(DataValue::Bool(false)),
            other => Err(CodecError::Malformed(format!("bad bool value: {}", other))),
        },
        "string" => Ok(DataValue::Text(raw.to_string())),
        other => Err(CodecError::Malformed(format!("unknown value type: {}", other))),
    }
}

impl CacheCodec {
    pub fn encode(&self, result: &QueryResponse) -> Vec<u8> {
        match self {
            CacheCodec::Plain => {
                let mut out = String::new();
                for entry in &result.entries {
                    let (kind, value) = value_fields(entry);
                    out.push_str(&format!("{},{},{}\n", entry.key, kind, value));
                }
                out.into_bytes()
            }
            CacheCodec::HeaderPrefixed => {
                let mut out = format!(
                    "{},{},{}",
                    result.success,
                    result.message,
                    result.entries.len()
                );
                for entry in &result.entries {
                    let (kind, value) = value_fields(entry);
                    out.push_str(&format!(",{},{},{}", entry.key, kind, value));
                }
                out.into_bytes()
            }
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<CachedResult, CodecError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| CodecError::Malformed("payload is not UTF-8".to_string()))?;

        match self {
            CacheCodec::Plain => {
                let mut entries = Vec::new();
                for line in text.lines() {
                    if line.is_empty() {
                        continue;
                    }
                    let mut fields = line.splitn(3, ',');
                    let key = fields
                        .next()
                        .ok_or_else(|| CodecError::Malformed(line.to_string()))?;
                    let kind = fields
                        .next()
                        .ok_or_else(|| CodecError::Malformed(line.to_string()))?;
                    let raw = fields
                        .next()
                        .ok_or_else(|| CodecError::Malformed(line.to_string()))?;
                    entries.push(DataEntry::new(key, parse_value(kind, raw)?, 0));
                }
                Ok(CachedResult {
                    success: true,
                    message: String::new(),
                    entries,
                })
            }
            CacheCodec::HeaderPrefixed => {
                let fields: Vec<&str> = text.split(',').collect();
                if fields.len() < 3 {
                    return Err(CodecError::Malformed("header too short".to_string()));
                }
                let success = match fields[0] {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(CodecError::Malformed(format!(
                            "bad success flag: {}",
                            other
                        )))
                    }
                };
                let message = fields[1].to_string();
                let count: usize = fields[2]
                    .parse()
                    .map_err(|_| CodecError::Malformed(format!("bad count: {}", fields[2])))?;

                let body = &fields[3..];
                if body.len() != count * 3 {
                    return Err(CodecError::Malformed(format!(
                        "expected {} entry fields, found {}",
                        count * 3,
                        body.len()
                    )));
                }

                let mut entries = Vec::with_capacity(count);
                for triple in body.chunks(3) {
                    entries.push(DataEntry::new(
                        triple[0],
                        parse_value(triple[1], triple[2])?,
                        0,
                    ));
                }

                Ok(CachedResult {
                    success,
                    message,
                    entries,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_protocol::types::CrashRecord;

    fn response(entries: Vec<DataEntry>) -> QueryResponse {
        QueryResponse {
            query_id: "q".to_string(),
            success: true,
            message: "Found 2 matching entries".to_string(),
            entries,
            timing_data: String::new(),
        }
    }

    #[test]
    fn test_plain_round_trip() {
        let result = response(vec![
            DataEntry::new("a", DataValue::Int32(5), 0),
            DataEntry::new("b", DataValue::Bool(false), 0),
            DataEntry::new("c", DataValue::Float64(2.5), 0),
            DataEntry::new("d", DataValue::Text("free text".to_string()), 0),
        ]);

        let codec = CacheCodec::Plain;
        let decoded = codec.decode(&codec.encode(&result)).expect("decode");

        assert!(decoded.success);
        assert_eq!(decoded.entries, result.entries);
    }

    #[test]
    fn test_plain_crash_record_placeholder() {
        let record = CrashRecord {
            borough: "BRONX".to_string(),
            ..Default::default()
        };
        let result = response(vec![DataEntry::new("crash_3", DataValue::Crash(record), 0)]);

        let encoded = CacheCodec::Plain.encode(&result);

        assert_eq!(
            String::from_utf8(encoded.clone()).unwrap(),
            "crash_3,string,CrashData:crash_3\n"
        );
        let decoded = CacheCodec::Plain.decode(&encoded).expect("decode");
        assert_eq!(
            decoded.entries[0].value,
            DataValue::Text("CrashData:crash_3".to_string())
        );
    }

    #[test]
    fn test_header_prefixed_round_trip() {
        let result = response(vec![
            DataEntry::new("a", DataValue::Int32(5), 0),
            DataEntry::new("b", DataValue::Text("x".to_string()), 0),
        ]);

        let codec = CacheCodec::HeaderPrefixed;
        let encoded = codec.encode(&result);

        assert_eq!(
            String::from_utf8(encoded.clone()).unwrap(),
            "true,Found 2 matching entries,2,a,int,5,b,string,x"
        );

        let decoded = codec.decode(&encoded).expect("decode");
        assert!(decoded.success);
        assert_eq!(decoded.message, "Found 2 matching entries");
        assert_eq!(decoded.entries, result.entries);
    }

    #[test]
    fn test_header_prefixed_empty_result() {
        let result = response(vec![]);

        let codec = CacheCodec::HeaderPrefixed;
        let decoded = codec.decode(&codec.encode(&result)).expect("decode");

        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CacheCodec::Plain.decode(b"only-one-field\n").is_err());
        assert!(CacheCodec::HeaderPrefixed.decode(b"true,msg").is_err());
        assert!(CacheCodec::HeaderPrefixed
            .decode(b"maybe,msg,0")
            .is_err());
        assert!(CacheCodec::HeaderPrefixed
            .decode(b"true,msg,2,a,int,5")
            .is_err());
    }
}
