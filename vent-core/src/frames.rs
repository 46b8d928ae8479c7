//! Framing: delimiter-split chunks and COBS byte stuffing so the delimiter
//! never appears inside a frame.

use crate::error::{ConstructionError, DataError, ProtocolError};
use crate::sansio::{ByteStream, EventQueue, Filter};

/// Frame delimiter on the device link.
pub const FRAME_DELIMITER: u8 = 0x00;
/// Largest chunk on the wire, delimiter and COBS overhead included.
pub const CHUNK_MAX_SIZE: usize = 256;
/// Largest payload the COBS encoder accepts.
pub const FRAME_PAYLOAD_MAX_SIZE: usize = CHUNK_MAX_SIZE - 2;

fn single_byte(delimiter: &[u8]) -> Result<u8, ConstructionError> {
    match delimiter {
        [byte] => Ok(*byte),
        _ => Err(ConstructionError::DelimiterLength(delimiter.len())),
    }
}

/// Splits a byte stream into chunks at each delimiter. The delimiter itself is dropped.
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    delimiter: u8,
    buffer: ByteStream,
    partial: Vec<u8>,
}

impl ChunkSplitter {
    pub fn new() -> Self {
        Self {
            delimiter: FRAME_DELIMITER,
            buffer: ByteStream::new(),
            partial: Vec::new(),
        }
    }

    pub fn with_delimiter(delimiter: &[u8]) -> Result<Self, ConstructionError> {
        Ok(Self {
            delimiter: single_byte(delimiter)?,
            ..Self::new()
        })
    }

    /// Bound the number of unscanned bytes held at once.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.buffer = ByteStream::with_capacity(capacity);
        self
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ChunkSplitter {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        while let Some(byte) = self.buffer.pop() {
            if byte == self.delimiter {
                return Ok(Some(std::mem::take(&mut self.partial)));
            }
            self.partial.push(byte);
        }
        Ok(None)
    }
}

/// Terminates every chunk with the delimiter.
#[derive(Debug, Clone)]
pub struct ChunkMerger {
    delimiter: u8,
    buffer: EventQueue<Vec<u8>>,
}

impl ChunkMerger {
    pub fn new() -> Self {
        Self {
            delimiter: FRAME_DELIMITER,
            buffer: EventQueue::new(),
        }
    }

    pub fn with_delimiter(delimiter: &[u8]) -> Result<Self, ConstructionError> {
        Ok(Self {
            delimiter: single_byte(delimiter)?,
            buffer: EventQueue::new(),
        })
    }
}

impl Default for ChunkMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ChunkMerger {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        Ok(self.buffer.pop().map(|mut chunk| {
            chunk.push(self.delimiter);
            chunk
        }))
    }
}

fn max_payload(chunk_max_size: usize) -> Result<usize, ConstructionError> {
    if chunk_max_size < 3 {
        return Err(ConstructionError::ChunkMaxSize(chunk_max_size));
    }
    Ok(chunk_max_size - 2)
}

/// COBS-encode a payload. Fails if the payload is longer than `max_len`.
pub fn cobs_encode(payload: &[u8], max_len: usize) -> Result<Vec<u8>, DataError> {
    if payload.len() > max_len {
        return Err(DataError::FrameTooLong {
            len: payload.len(),
            max: max_len,
        });
    }
    Ok(cobs::encode_vec(payload))
}

/// Decode a COBS body (without the trailing delimiter).
pub fn cobs_decode(body: &[u8]) -> Result<Vec<u8>, DataError> {
    if body.is_empty() {
        return Err(DataError::EmptyFrame);
    }
    // Walk the overhead codes first so corruption is reported precisely.
    let mut i = 0;
    while i < body.len() {
        let code = body[i] as usize;
        if code == 0 {
            return Err(DataError::CobsDecode(format!("zero byte at offset {i}")));
        }
        if i + code > body.len() {
            return Err(DataError::CobsDecode(format!(
                "code {code} at offset {i} points past end of {}-byte body",
                body.len()
            )));
        }
        if body[i + 1..i + code].contains(&0) {
            return Err(DataError::CobsDecode(format!(
                "zero byte inside block at offset {i}"
            )));
        }
        i += code;
    }
    cobs::decode_vec(body).map_err(|_| DataError::CobsDecode("malformed encoding".into()))
}

/// Encodes payloads into COBS bodies of at most `chunk_max_size - 1` bytes.
#[derive(Debug, Clone)]
pub struct CobsEncoder {
    max_payload: usize,
    buffer: EventQueue<Vec<u8>>,
}

impl CobsEncoder {
    pub fn new() -> Self {
        Self {
            max_payload: FRAME_PAYLOAD_MAX_SIZE,
            buffer: EventQueue::new(),
        }
    }

    pub fn with_chunk_max_size(chunk_max_size: usize) -> Result<Self, ConstructionError> {
        Ok(Self {
            max_payload: max_payload(chunk_max_size)?,
            buffer: EventQueue::new(),
        })
    }
}

impl Default for CobsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for CobsEncoder {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(payload) = self.buffer.pop() else {
            return Ok(None);
        };
        Ok(Some(cobs_encode(&payload, self.max_payload)?))
    }
}

/// Decodes COBS bodies back into payloads.
#[derive(Debug, Clone, Default)]
pub struct CobsDecoder {
    buffer: EventQueue<Vec<u8>>,
}

impl CobsDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for CobsDecoder {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(body) = self.buffer.pop() else {
            return Ok(None);
        };
        Ok(Some(cobs_decode(&body)?))
    }
}
