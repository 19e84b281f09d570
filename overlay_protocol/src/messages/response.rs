//! Response message returned for a query, carrying the merged entries and
//! the per-hop timing breakdown.

use std::io::Cursor;

use crate::errors::ProtocolError;
use crate::types::DataEntry;
use crate::wire::{get_string, get_u32, get_u8, put_string};
use crate::Serializable;

/// The outcome of a query at one node, including everything merged from its
/// downstream peers.
///
/// ### Fields
/// - `query_id`: Echo of the request's correlation id.
/// - `success`: Whether the query succeeded.
/// - `message`: Human-readable outcome description.
/// - `entries`: The contributed rows.
/// - `timing_data`: Serialized timing ledger, including downstream blobs.
#[derive(Debug, PartialEq, Clone)]
pub struct QueryResponse {
    /// Echo of the request's correlation id.
    pub query_id: String,
    /// Whether the query succeeded.
    pub success: bool,
    /// Human-readable outcome description.
    pub message: String,
    /// The contributed rows.
    pub entries: Vec<DataEntry>,
    /// Serialized timing ledger, including downstream blobs.
    pub timing_data: String,
}

impl QueryResponse {
    pub fn failure(query_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            success: false,
            message: message.into(),
            entries: Vec::new(),
            timing_data: String::new(),
        }
    }
}

impl Serializable for QueryResponse {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// |    query_id_len   |
    /// +----+----+----+----+
    /// |      query_id     |
    /// +----+----+----+----+
    /// |succ|  message_len
    /// +----+----+----+----+
    ///      |   message    |
    /// +----+----+----+----+
    /// |     n_entries     |
    /// +----+----+----+----+
    /// |      entries      |
    /// |        ...        |
    /// +----+----+----+----+
    /// |  timing_data_len  |
    /// +----+----+----+----+
    /// |    timing_data    |
    /// +----+----+----+----+
    /// ```
    /// Serializes the `QueryResponse` into a byte vector.
    fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_string(&mut bytes, &self.query_id);
        bytes.push(self.success as u8);
        put_string(&mut bytes, &self.message);

        bytes.extend(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            bytes.extend(entry.as_bytes());
        }

        put_string(&mut bytes, &self.timing_data);

        bytes
    }

    /// Deserializes a byte vector into a `QueryResponse`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);

        let query_id = get_string(&mut cursor)?;
        let success = get_u8(&mut cursor)? != 0;
        let message = get_string(&mut cursor)?;

        let n_entries = get_u32(&mut cursor)? as usize;
        let mut entries = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            entries.push(DataEntry::read(&mut cursor)?);
        }

        let timing_data = get_string(&mut cursor)?;

        Ok(QueryResponse {
            query_id,
            success,
            message,
            entries,
            timing_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataValue;

    #[test]
    fn test_response_round_trip() {
        let response = QueryResponse {
            query_id: "q-9".to_string(),
            success: true,
            message: "Combined results from Process A and 1 downstream processes".to_string(),
            entries: vec![
                DataEntry::new("kB", DataValue::Text("b".to_string()), 0),
                DataEntry::new("n", DataValue::Int32(4), 0),
            ],
            timing_data: "  [Process A]\n    Total_Processing    : 0.001000 seconds\n".to_string(),
        };

        let parsed = QueryResponse::from_bytes(&response.as_bytes()).unwrap();

        assert_eq!(parsed, response);
    }

    #[test]
    fn test_failure_round_trip() {
        let response = QueryResponse::failure("q-10", "Unknown query: get_by_moon_phase");

        let parsed = QueryResponse::from_bytes(&response.as_bytes()).unwrap();

        assert!(!parsed.success);
        assert_eq!(parsed.message, "Unknown query: get_by_moon_phase");
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn test_response_from_bytes_error() {
        let parsed = QueryResponse::from_bytes(&[0, 0, 0, 1]);

        assert!(parsed.is_err());
    }
}
