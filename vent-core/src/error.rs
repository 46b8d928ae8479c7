//! Error taxonomy shared by every layer.

/// Malformed or unacceptable data encountered while transforming an event.
/// Compositions log these and drop the offending item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("frame payload too long for COBS encoding: {len} bytes (max {max})")]
    FrameTooLong { len: usize, max: usize },
    #[error("cannot COBS-decode an empty body")]
    EmptyFrame,
    #[error("could not COBS-decode body: {0}")]
    CobsDecode(String),
    #[error("CRC element body must be between 4 and 256 bytes, got {0}")]
    CrcBodySize(usize),
    #[error("CRC mismatch: received 0x{received:08x}, computed 0x{computed:08x}")]
    CrcMismatch { received: u32, computed: u32 },
    #[error("datagram payload too long: {0} bytes (max 255)")]
    DatagramTooLong(usize),
    #[error("unparseable datagram header: {0} bytes")]
    DatagramHeader(usize),
    #[error("datagram length mismatch: header says {specified}, payload has {actual}")]
    DatagramLength { specified: u8, actual: usize },
    #[error("unparseable message header: empty body")]
    MessageHeader,
    #[error("unknown message type code: {0}")]
    UnknownTypeCode(u8),
    #[error("message type does not have a code: {0}")]
    UnregisteredType(String),
    #[error("unparseable {kind} payload: {reason}")]
    PayloadDeserialize { kind: String, reason: String },
    #[error("unserializable {kind} payload: {reason}")]
    PayloadSerialize { kind: String, reason: String },
    #[error("next expected id decreased from {previous} to {requested}")]
    NonMonotonicRequest { previous: u32, requested: u32 },
    #[error("empty file: {0}")]
    EmptyFile(String),
    #[error("{state_type}: {source}")]
    File {
        state_type: String,
        #[source]
        source: Box<DataError>,
    },
    #[error("the state type {found} in the file does not match the filename {expected}")]
    FileTypeMismatch { expected: String, found: String },
}

/// A bounded buffer refused an input because it is full.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("buffer is full: {len} of {capacity} items, rejected {rejected} more")]
pub struct CapacityError {
    pub capacity: usize,
    pub len: usize,
    pub rejected: usize,
}

/// Invalid static configuration passed to a constructor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("delimiter must be exactly one byte, got {0}")]
    DelimiterLength(usize),
    #[error("chunk max size must be at least 3, got {0}")]
    ChunkMaxSize(usize),
    #[error("output schedule must not be empty")]
    EmptySchedule,
    #[error("max_len must be between 1 and 2^32, got {0}")]
    MaxLen(u64),
    #[error("max_segment_len must be at least 1")]
    MaxSegmentLen,
    #[error("type code {0} is registered twice")]
    DuplicateCode(u8),
    #[error("type {0} is registered twice")]
    DuplicateKind(String),
}

/// Error returned by `Filter::input` and `Filter::output`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_mismatch_names_both_values() {
        let err = DataError::CrcMismatch {
            received: 0xdeadbeef,
            computed: 0x01020304,
        };
        let text = err.to_string();
        assert!(text.contains("0xdeadbeef"));
        assert!(text.contains("0x01020304"));
    }

    #[test]
    fn protocol_error_wraps_both_kinds() {
        let data: ProtocolError = DataError::EmptyFrame.into();
        assert!(matches!(data, ProtocolError::Data(DataError::EmptyFrame)));
        let full: ProtocolError = CapacityError {
            capacity: 1,
            len: 1,
            rejected: 1,
        }
        .into();
        assert!(matches!(full, ProtocolError::Capacity(_)));
    }
}
