//! Data encodings for the bootstrap protocol.
//!
//! * json: used for mesh payloads and the published address book.
//! * frame: length-prefixes mesh payloads on peer connections.

pub mod frame;
pub mod json;

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Adds automatic JSON encode/decode methods to value types, along with
/// framed stream variants for the mesh wire protocol.
pub trait Value: Serialize + DeserializeOwned {
    /// Decodes a value from a JSON byte slice.
    fn decode(bytes: &[u8]) -> Result<Self> {
        json::deserialize(bytes)
    }

    /// Encodes a value to a JSON byte vector.
    fn encode(&self) -> Result<Vec<u8>> {
        json::serialize(self)
    }

    /// Reads a single length-prefixed value from a reader.
    fn read_from<R: Read>(reader: R) -> Result<Self> {
        Self::decode(&frame::read(reader)?)
    }

    /// Writes this value to a writer as a single length-prefixed frame.
    fn write_into<W: Write>(&self, writer: W) -> Result<()> {
        frame::write(writer, &self.encode()?)
    }
}

/// Blanket implementation for sequences of a value type, covering the
/// published address book's nested rows.
impl<V: Value> Value for Vec<V> {}
