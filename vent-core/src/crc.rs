//! CRC-32C integrity elements: `crc (4 bytes BE) | payload`.

use crc::{Crc, CRC_32_ISCSI};

use crate::error::{DataError, ProtocolError};
use crate::sansio::{EventQueue, Filter};

/// CRC-32C (Castagnoli, reflected, init and xorout 0xFFFFFFFF).
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub const CRC_SIZE: usize = 4;
/// Bounds on a parsed CRC element body, checksum included.
pub const BODY_MIN_SIZE: usize = CRC_SIZE;
pub const BODY_MAX_SIZE: usize = 256;

/// Compute the CRC-32C of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32C.checksum(bytes)
}

/// A payload protected by a CRC-32C prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrcElement {
    pub crc: u32,
    pub payload: Vec<u8>,
}

impl CrcElement {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            crc: checksum(&payload),
            payload,
        }
    }

    /// Split a body into checksum and payload without verifying it.
    pub fn parse(body: &[u8]) -> Result<Self, DataError> {
        if !(BODY_MIN_SIZE..=BODY_MAX_SIZE).contains(&body.len()) {
            return Err(DataError::CrcBodySize(body.len()));
        }
        let (crc, payload) = body.split_at(CRC_SIZE);
        Ok(Self {
            crc: u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]),
            payload: payload.to_vec(),
        })
    }

    pub fn compute_crc(&self) -> u32 {
        checksum(&self.payload)
    }

    /// Recompute the checksum and compare it with the stored one.
    pub fn check_integrity(&self) -> Result<(), DataError> {
        let computed = self.compute_crc();
        if computed != self.crc {
            return Err(DataError::CrcMismatch {
                received: self.crc,
                computed,
            });
        }
        Ok(())
    }

    /// Recompute the checksum and serialize `crc | payload`.
    pub fn get_body(&mut self) -> Vec<u8> {
        self.crc = self.compute_crc();
        let mut out = Vec::with_capacity(CRC_SIZE + self.payload.len());
        out.extend_from_slice(&self.crc.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Prefixes each payload with its CRC-32C. Empty inputs are ignored.
#[derive(Debug, Clone, Default)]
pub struct CrcSender {
    buffer: EventQueue<Vec<u8>>,
}

impl CrcSender {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for CrcSender {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event.filter(|e| !e.is_empty()))
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        Ok(self.buffer.pop().map(|payload| CrcElement::new(payload).get_body()))
    }
}

/// Verifies and strips the CRC-32C prefix. Empty inputs are ignored.
#[derive(Debug, Clone, Default)]
pub struct CrcReceiver {
    buffer: EventQueue<Vec<u8>>,
}

impl CrcReceiver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for CrcReceiver {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event.filter(|e| !e.is_empty()))
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(body) = self.buffer.pop() else {
            return Ok(None);
        };
        let element = CrcElement::parse(&body)?;
        element.check_integrity()?;
        Ok(Some(element.payload))
    }
}
