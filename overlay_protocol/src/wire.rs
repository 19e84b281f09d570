//! Cursor helpers shared by the message codecs.

use std::io::{Cursor, Read};

use crate::errors::ProtocolError;

pub(crate) fn put_string(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend(&(s.len() as u32).to_be_bytes());
    bytes.extend(s.as_bytes());
}

pub(crate) fn put_bytes(bytes: &mut Vec<u8>, data: &[u8]) {
    bytes.extend(&(data.len() as u32).to_be_bytes());
    bytes.extend(data);
}

pub(crate) fn get_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let mut buf = [0u8; 1];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    Ok(buf[0])
}

pub(crate) fn get_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn get_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, ProtocolError> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    Ok(i32::from_be_bytes(buf))
}

pub(crate) fn get_f64(cursor: &mut Cursor<&[u8]>) -> Result<f64, ProtocolError> {
    let mut buf = [0u8; 8];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    Ok(f64::from_be_bytes(buf))
}

pub(crate) fn get_string(cursor: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let len = get_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

pub(crate) fn get_blob(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ProtocolError> {
    let len = get_u32(cursor)? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::Truncated)?;
    Ok(buf)
}
