//! Query message sent by a client to the portal, and forwarded unchanged
//! between nodes.
//!
//! The query id is chosen by the client and is the stable correlation key
//! for the query across the whole overlay; nodes never rewrite it.

use std::io::Cursor;

use crate::errors::ProtocolError;
use crate::wire::{get_string, get_u32, put_string};
use crate::Serializable;

/// A query against the distributed crash dataset.
///
/// ### Fields
/// - `query_id`: Client-chosen correlation id, unique per in-flight query.
/// - `verb`: The operation, drawn from the closed verb set.
/// - `params`: Verb parameters, in order.
#[derive(Debug, PartialEq, Clone)]
pub struct QueryRequest {
    /// Client-chosen correlation id, unique per in-flight query.
    pub query_id: String,
    /// The operation, drawn from the closed verb set.
    pub verb: String,
    /// Verb parameters, in order.
    pub params: Vec<String>,
}

impl QueryRequest {
    pub fn new(query_id: impl Into<String>, verb: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            query_id: query_id.into(),
            verb: verb.into(),
            params,
        }
    }
}

impl Serializable for QueryRequest {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// |    query_id_len   |
    /// +----+----+----+----+
    /// |      query_id     |
    /// +----+----+----+----+
    /// |      verb_len     |
    /// +----+----+----+----+
    /// |        verb       |
    /// +----+----+----+----+
    /// |    params_count   |
    /// +----+----+----+----+
    /// |    param1_len     |
    /// +----+----+----+----+
    /// |      param1       |
    /// +----+----+----+----+
    /// |        ...        |
    /// +----+----+----+----+
    /// ```
    /// Serializes the `QueryRequest` into a byte vector.
    fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_string(&mut bytes, &self.query_id);
        put_string(&mut bytes, &self.verb);

        bytes.extend(&(self.params.len() as u32).to_be_bytes());
        for param in &self.params {
            put_string(&mut bytes, param);
        }

        bytes
    }

    /// Deserializes a byte vector into a `QueryRequest`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);

        let query_id = get_string(&mut cursor)?;
        let verb = get_string(&mut cursor)?;

        let params_count = get_u32(&mut cursor)? as usize;
        let mut params = Vec::with_capacity(params_count);
        for _ in 0..params_count {
            params.push(get_string(&mut cursor)?);
        }

        Ok(QueryRequest {
            query_id,
            verb,
            params,
        })
    }
}
