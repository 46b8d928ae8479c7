//! Persisted state: one file per state type, holding a CRC element whose
//! payload is a message body. The host reads and writes the bytes; this link
//! only converts between [`StateData`] and typed values.

use std::sync::Arc;

use log::error;

use crate::crc::{CrcReceiver, CrcSender};
use crate::error::{DataError, ProtocolError};
use crate::messages::{MessageReceiver, MessageSender, Payload, Registry};
use crate::sansio::{EventQueue, Filter};

/// Extension of persisted state files.
pub const FILE_EXTENSION: &str = "pb";

/// Raw contents of one state file, tagged with the state type it should hold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateData {
    pub state_type: String,
    pub data: Option<Vec<u8>>,
}

impl StateData {
    pub fn new(state_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            state_type: state_type.into(),
            data: Some(data),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{FILE_EXTENSION}", self.state_type)
    }
}

pub struct FileReceiver<P: Payload> {
    buffer: EventQueue<StateData>,
    crc_receiver: CrcReceiver,
    message_receiver: MessageReceiver<P>,
}

impl<P: Payload> FileReceiver<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            buffer: EventQueue::new(),
            crc_receiver: CrcReceiver::new(),
            message_receiver: MessageReceiver::new(registry),
        }
    }
}

impl<P: Payload> Filter for FileReceiver<P> {
    type Input = StateData;
    type Output = P;

    /// An event without data means the file was empty and is rejected here.
    fn input(&mut self, event: Option<StateData>) -> Result<(), ProtocolError> {
        let Some(event) = event else {
            return Ok(());
        };
        if event.data.as_ref().map_or(true, Vec::is_empty) {
            return Err(DataError::EmptyFile(event.state_type).into());
        }
        self.buffer.input(Some(event))
    }

    fn output(&mut self) -> Result<Option<P>, ProtocolError> {
        let Some(StateData { state_type, data }) = self.buffer.pop() else {
            return Ok(None);
        };
        self.crc_receiver.input(data)?;
        let body = self.crc_receiver.output().map_err(|err| match err {
            ProtocolError::Data(source) => ProtocolError::Data(DataError::File {
                state_type: state_type.clone(),
                source: Box::new(source),
            }),
            other => other,
        })?;
        let Some(body) = body else {
            return Ok(None);
        };
        self.message_receiver.input(Some(body))?;
        let value = match self.message_receiver.output() {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!("FileReceiver({state_type}): {err}");
                return Ok(None);
            }
        };
        let found = P::kind_name(value.kind());
        if found != state_type {
            return Err(DataError::FileTypeMismatch {
                expected: state_type,
                found: found.to_string(),
            }
            .into());
        }
        Ok(Some(value))
    }
}

pub struct FileSender<P: Payload> {
    buffer: EventQueue<P>,
    message_sender: MessageSender<P>,
    crc_sender: CrcSender,
}

impl<P: Payload> FileSender<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            buffer: EventQueue::new(),
            message_sender: MessageSender::new(registry),
            crc_sender: CrcSender::new(),
        }
    }
}

impl<P: Payload> Filter for FileSender<P> {
    type Input = P;
    type Output = StateData;

    fn input(&mut self, event: Option<P>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<StateData>, ProtocolError> {
        let Some(value) = self.buffer.pop() else {
            return Ok(None);
        };
        let state_type = P::kind_name(value.kind());
        self.message_sender.input(Some(value))?;
        let body = match self.message_sender.output() {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!("FileSender({state_type}): {err}");
                return Ok(None);
            }
        };
        self.crc_sender.input(Some(body))?;
        Ok(self
            .crc_sender
            .output()?
            .map(|data| StateData::new(state_type, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, ParametersRequest, State, StateKind, VentilationMode};

    fn registry() -> Arc<Registry<StateKind>> {
        Arc::new(schema::device_registry())
    }

    fn request() -> State {
        State::ParametersRequest(ParametersRequest {
            time: 10,
            ventilating: true,
            mode: VentilationMode::VcAc,
            fio2: 60.0,
            ..Default::default()
        })
    }

    fn save(value: State) -> StateData {
        let mut sender = FileSender::<State>::new(registry());
        sender.input(Some(value)).unwrap();
        sender.output().unwrap().unwrap()
    }

    #[test]
    fn state_round_trips_through_file() {
        let data = save(request());
        assert_eq!(data.state_type, "ParametersRequest");
        assert_eq!(data.file_name(), "ParametersRequest.pb");
        let mut receiver = FileReceiver::<State>::new(registry());
        receiver.input(Some(data)).unwrap();
        assert_eq!(receiver.output().unwrap(), Some(request()));
    }

    #[test]
    fn empty_file_rejected_at_input() {
        let mut receiver = FileReceiver::<State>::new(registry());
        let result = receiver.input(Some(StateData {
            state_type: "Parameters".into(),
            data: None,
        }));
        assert!(matches!(
            result,
            Err(ProtocolError::Data(DataError::EmptyFile(name))) if name == "Parameters"
        ));
    }

    #[test]
    fn corrupt_file_names_state_type() {
        let mut data = save(request());
        if let Some(bytes) = data.data.as_mut() {
            bytes[6] ^= 0xff;
        }
        let mut receiver = FileReceiver::<State>::new(registry());
        receiver.input(Some(data)).unwrap();
        match receiver.output() {
            Err(ProtocolError::Data(DataError::File { state_type, source })) => {
                assert_eq!(state_type, "ParametersRequest");
                assert!(matches!(*source, DataError::CrcMismatch { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_file_name_rejected() {
        let mut data = save(request());
        data.state_type = "AlarmLimitsRequest".into();
        let mut receiver = FileReceiver::<State>::new(registry());
        receiver.input(Some(data)).unwrap();
        assert!(matches!(
            receiver.output(),
            Err(ProtocolError::Data(DataError::FileTypeMismatch { .. }))
        ));
    }
}
