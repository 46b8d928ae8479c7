//! Datagrams: `crc (4 BE) | seq (1) | length (1) | payload`, where the crc
//! covers everything after it. The receiver detects loss and reordering
//! through the sequence number but never fails on it.

use log::{info, warn};

use crate::crc;
use crate::error::{DataError, ProtocolError};
use crate::sansio::{EventQueue, Filter};

pub const HEADER_SIZE: usize = 6;
pub const PAYLOAD_MAX_SIZE: usize = u8::MAX as usize;

/// One parsed or to-be-sent datagram.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Datagram {
    pub crc: u32,
    pub seq: u8,
    pub length: u8,
    pub payload: Vec<u8>,
}

impl Datagram {
    /// Build a datagram for `payload` with header fields filled in.
    pub fn new(seq: u8, payload: Vec<u8>) -> Result<Self, DataError> {
        let length = u8::try_from(payload.len())
            .map_err(|_| DataError::DatagramTooLong(payload.len()))?;
        let mut datagram = Self {
            crc: 0,
            seq,
            length,
            payload,
        };
        datagram.crc = datagram.compute_protected_crc();
        Ok(datagram)
    }

    /// Parse header and payload. Integrity is checked separately.
    pub fn parse(body: &[u8]) -> Result<Self, DataError> {
        if body.len() < HEADER_SIZE {
            return Err(DataError::DatagramHeader(body.len()));
        }
        Ok(Self {
            crc: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            seq: body[4],
            length: body[5],
            payload: body[HEADER_SIZE..].to_vec(),
        })
    }

    /// CRC-32C over `seq | length | payload`.
    pub fn compute_protected_crc(&self) -> u32 {
        let mut digest = crc::CRC32C.digest();
        digest.update(&[self.seq, self.length]);
        digest.update(&self.payload);
        digest.finalize()
    }

    pub fn check_integrity(&self) -> Result<(), DataError> {
        let computed = self.compute_protected_crc();
        if computed != self.crc {
            return Err(DataError::CrcMismatch {
                received: self.crc,
                computed,
            });
        }
        Ok(())
    }

    pub fn check_length(&self) -> Result<(), DataError> {
        if self.length as usize != self.payload.len() {
            return Err(DataError::DatagramLength {
                specified: self.length,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    /// Serialize the header fields as stored, followed by the payload.
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.crc.to_be_bytes());
        out.push(self.seq);
        out.push(self.length);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Parses datagrams, verifies them and tracks the sender's sequence number.
#[derive(Debug, Clone, Default)]
pub struct DatagramReceiver {
    buffer: EventQueue<Vec<u8>>,
    expected_seq: Option<u8>,
    resyncs: u64,
}

impl DatagramReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number expected next, `None` until the first datagram arrives.
    pub fn expected_seq(&self) -> Option<u8> {
        self.expected_seq
    }

    /// Times a sequence gap forced a resync since construction.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    fn track_seq(&mut self, seq: u8) {
        match self.expected_seq {
            None => info!("DatagramReceiver: initialized expected sequence number at {seq}"),
            Some(expected) if expected != seq => {
                warn!("DatagramReceiver: expected seq {expected}, received {seq}; resynchronizing");
                self.resyncs += 1;
            }
            Some(_) => {}
        }
        self.expected_seq = Some(seq.wrapping_add(1));
    }
}

impl Filter for DatagramReceiver {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(body) = self.buffer.pop() else {
            return Ok(None);
        };
        let datagram = Datagram::parse(&body)?;
        datagram.check_integrity()?;
        datagram.check_length()?;
        self.track_seq(datagram.seq);
        Ok(Some(datagram.payload))
    }
}

/// Wraps payloads in datagrams with an incrementing sequence number.
#[derive(Debug, Clone, Default)]
pub struct DatagramSender {
    buffer: EventQueue<Vec<u8>>,
    seq: u8,
}

impl DatagramSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next datagram will carry.
    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl Filter for DatagramSender {
    type Input = Vec<u8>;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(payload) = self.buffer.pop() else {
            return Ok(None);
        };
        let datagram = Datagram::new(self.seq, payload)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(Some(datagram.body()))
    }
}
