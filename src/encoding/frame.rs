//! Length-prefixed framing for the bootstrap mesh. Every message is a 16-byte
//! ASCII decimal length prefix, left-padded with zeroes, followed by exactly
//! that many bytes of payload. There is no message type tag: both sides run
//! the same deterministic phase sequence, so the payload shape is implied by
//! the protocol phase.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// The fixed size of the ASCII length prefix.
pub const PREFIX_SIZE: usize = 16;

/// Writes a single framed payload.
pub fn write<W: Write>(mut writer: W, payload: &[u8]) -> Result<()> {
    write!(writer, "{:0width$}", payload.len(), width = PREFIX_SIZE)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads a single framed payload.
pub fn read<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let len = std::str::from_utf8(&prefix)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::IO(format!("invalid frame length prefix {prefix:?}")))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}
