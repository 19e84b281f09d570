use std::fmt::{self, Display};

/// Errors produced while serializing or deserializing protocol frames.
#[derive(Debug, PartialEq)]
pub enum ProtocolError {
    /// The buffer ended before the announced content did.
    Truncated,
    /// The frame carried an opcode this protocol does not define.
    InvalidOpcode(u8),
    /// A value tag byte was outside the defined set.
    InvalidTag(u8),
    /// A string field was not valid UTF-8.
    InvalidUtf8,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "Truncated frame"),
            ProtocolError::InvalidOpcode(op) => write!(f, "Invalid opcode: {:#04x}", op),
            ProtocolError::InvalidTag(tag) => write!(f, "Invalid value tag: {:#04x}", tag),
            ProtocolError::InvalidUtf8 => write!(f, "Invalid UTF-8 in string field"),
        }
    }
}

impl std::error::Error for ProtocolError {}
