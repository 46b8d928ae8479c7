//! Device link: typed values over a byte stream of COBS frames, each holding a
//! CRC element that protects a sequenced datagram carrying one message.

use std::sync::Arc;

use log::{error, info};

use crate::crc::{CrcReceiver, CrcSender};
use crate::datagrams::{DatagramReceiver, DatagramSender};
use crate::error::ProtocolError;
use crate::frames::{ChunkMerger, ChunkSplitter, CobsDecoder, CobsEncoder};
use crate::messages::{MessageReceiver, MessageSender, Payload, Registry};
use crate::sansio::Filter;

/// Run one stage: feed `input`, pull one output, log and drop any error.
pub(crate) fn stage<F: Filter>(
    name: &str,
    filter: &mut F,
    input: Option<F::Input>,
) -> Option<F::Output> {
    if let Err(err) = filter.input(input) {
        error!("{name}: {err}");
        return None;
    }
    match filter.output() {
        Ok(output) => output,
        Err(err) => {
            error!("{name}: {err}");
            None
        }
    }
}

/// Bytes from the device in, typed values out.
pub struct DeviceReceiver<P: Payload> {
    splitter: ChunkSplitter,
    cobs_decoder: CobsDecoder,
    crc_receiver: CrcReceiver,
    datagram_receiver: DatagramReceiver,
    message_receiver: MessageReceiver<P>,
}

impl<P: Payload> DeviceReceiver<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            splitter: ChunkSplitter::new(),
            cobs_decoder: CobsDecoder::new(),
            crc_receiver: CrcReceiver::new(),
            datagram_receiver: DatagramReceiver::new(),
            message_receiver: MessageReceiver::new(registry),
        }
    }

    /// Receiver that rejects a read once `capacity` bytes are waiting to be split.
    pub fn with_buffer_capacity(registry: Arc<Registry<P::Kind>>, capacity: usize) -> Self {
        Self {
            splitter: ChunkSplitter::new().with_capacity(capacity),
            ..Self::new(registry)
        }
    }

    /// Sequence number the device is expected to send next.
    pub fn expected_seq(&self) -> Option<u8> {
        self.datagram_receiver.expected_seq()
    }

    fn decode_chunk(&mut self, chunk: Vec<u8>) -> Option<P> {
        self.cobs_decoder.input(Some(chunk.clone())).ok()?;
        let frame_payload = match self.cobs_decoder.output() {
            Ok(payload) => payload,
            Err(err) => {
                if self.datagram_receiver.expected_seq().is_none() {
                    info!(
                        "DeviceReceiver: discarding incomplete frame because no datagram has been received yet: {chunk:02x?}"
                    );
                } else {
                    error!("CobsDecoder: {err}: {chunk:02x?}");
                }
                None
            }
        }?;
        let crc_payload = stage("CrcReceiver", &mut self.crc_receiver, Some(frame_payload))?;
        let datagram_payload = stage(
            "DatagramReceiver",
            &mut self.datagram_receiver,
            Some(crc_payload),
        )?;
        stage(
            "MessageReceiver",
            &mut self.message_receiver,
            Some(datagram_payload),
        )
    }
}

impl<P: Payload> Filter for DeviceReceiver<P> {
    type Input = Vec<u8>;
    type Output = P;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.splitter.input(event)
    }

    /// Decode chunks until one yields a value or no complete chunk is left.
    fn output(&mut self) -> Result<Option<P>, ProtocolError> {
        while let Some(chunk) = self.splitter.output()? {
            if let Some(value) = self.decode_chunk(chunk) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Typed values in, delimited frames for the device out.
pub struct DeviceSender<P: Payload> {
    message_sender: MessageSender<P>,
    datagram_sender: DatagramSender,
    crc_sender: CrcSender,
    cobs_encoder: CobsEncoder,
    merger: ChunkMerger,
}

impl<P: Payload> DeviceSender<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            message_sender: MessageSender::new(registry),
            datagram_sender: DatagramSender::new(),
            crc_sender: CrcSender::new(),
            cobs_encoder: CobsEncoder::new(),
            merger: ChunkMerger::new(),
        }
    }
}

impl<P: Payload> Filter for DeviceSender<P> {
    type Input = P;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<P>) -> Result<(), ProtocolError> {
        self.message_sender.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let message_body = match self.message_sender.output() {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!("MessageSender: {err}");
                return Ok(None);
            }
        };
        let frame = stage("DatagramSender", &mut self.datagram_sender, Some(message_body))
            .and_then(|datagram| stage("CrcSender", &mut self.crc_sender, Some(datagram)))
            .and_then(|body| stage("CobsEncoder", &mut self.cobs_encoder, Some(body)))
            .and_then(|encoded| stage("ChunkMerger", &mut self.merger, Some(encoded)));
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        self, Alarms, CycleMeasurements, NextLogEvents, Parameters, Ping, SensorMeasurements,
        State, StateKind, VentilationMode,
    };

    fn registry() -> Arc<Registry<StateKind>> {
        Arc::new(schema::device_registry())
    }

    fn encode(sender: &mut DeviceSender<State>, value: State) -> Vec<u8> {
        sender.input(Some(value)).unwrap();
        sender.output().unwrap().unwrap()
    }

    fn samples() -> Vec<State> {
        vec![
            State::Alarms(Alarms {
                time: 1,
                alarm_one: true,
                alarm_two: false,
            }),
            State::SensorMeasurements(SensorMeasurements {
                time: 2,
                cycle: 3,
                fio2: 21.0,
                paw: 5.5,
                ..Default::default()
            }),
            State::CycleMeasurements(CycleMeasurements {
                time: 4,
                rr: 12.0,
                ..Default::default()
            }),
            State::Parameters(Parameters {
                time: 5,
                ventilating: true,
                mode: VentilationMode::Psv,
                ..Default::default()
            }),
            State::NextLogEvents(NextLogEvents::default()),
            State::Ping(Ping { time: 6, id: 7 }),
        ]
    }

    #[test]
    fn round_trip_every_sample() {
        let mut sender = DeviceSender::<State>::new(registry());
        let mut receiver = DeviceReceiver::<State>::new(registry());
        for value in samples() {
            let frame = encode(&mut sender, value.clone());
            assert_eq!(*frame.last().unwrap(), 0);
            assert!(!frame[..frame.len() - 1].contains(&0));
            receiver.input(Some(frame)).unwrap();
            assert_eq!(receiver.output().unwrap(), Some(value));
        }
        assert_eq!(receiver.output().unwrap(), None);
    }

    #[test]
    fn frames_split_across_reads() {
        let mut sender = DeviceSender::<State>::new(registry());
        let mut receiver = DeviceReceiver::<State>::new(registry());
        let frame = encode(&mut sender, State::Ping(Ping { time: 1, id: 1 }));
        let (head, tail) = frame.split_at(3);
        receiver.input(Some(head.to_vec())).unwrap();
        assert_eq!(receiver.output().unwrap(), None);
        receiver.input(Some(tail.to_vec())).unwrap();
        assert!(receiver.output().unwrap().is_some());
    }

    #[test]
    fn corrupted_frame_dropped_next_frame_decodes() {
        let mut sender = DeviceSender::<State>::new(registry());
        let mut receiver = DeviceReceiver::<State>::new(registry());
        let good = encode(&mut sender, State::Ping(Ping { time: 1, id: 1 }));
        receiver.input(Some(good)).unwrap();
        receiver.output().unwrap().unwrap();

        let mut bad = encode(&mut sender, State::Ping(Ping { time: 2, id: 2 }));
        let last = bad.len() - 2;
        bad[last] ^= 0x10;
        if bad[last] == 0 {
            bad[last] = 0x7f;
        }
        let next = encode(&mut sender, State::Ping(Ping { time: 3, id: 3 }));
        let mut stream = bad;
        stream.extend_from_slice(&next);
        receiver.input(Some(stream)).unwrap();
        assert_eq!(
            receiver.output().unwrap(),
            Some(State::Ping(Ping { time: 3, id: 3 }))
        );
        assert_eq!(receiver.output().unwrap(), None);
    }

    #[test]
    fn leading_garbage_before_first_frame() {
        let mut sender = DeviceSender::<State>::new(registry());
        let mut receiver = DeviceReceiver::<State>::new(registry());
        let mut stream = vec![0x33, 0x44, 0x00];
        stream.extend(encode(&mut sender, State::Ping(Ping { time: 0, id: 9 })));
        receiver.input(Some(stream)).unwrap();
        assert_eq!(
            receiver.output().unwrap(),
            Some(State::Ping(Ping { time: 0, id: 9 }))
        );
        assert_eq!(receiver.expected_seq(), Some(1));
    }

    #[test]
    fn full_buffer_rejects_read() {
        let mut sender = DeviceSender::<State>::new(registry());
        let frame = encode(&mut sender, State::Ping(Ping { time: 1, id: 1 }));
        let mut receiver =
            DeviceReceiver::<State>::with_buffer_capacity(registry(), frame.len());
        receiver.input(Some(frame.clone())).unwrap();
        assert!(matches!(
            receiver.input(Some(vec![0x01])),
            Err(ProtocolError::Capacity(_))
        ));
        assert_eq!(
            receiver.output().unwrap(),
            Some(State::Ping(Ping { time: 1, id: 1 }))
        );
        receiver.input(Some(frame)).unwrap();
    }

    #[test]
    fn unregistered_value_is_dropped() {
        let mut sender = DeviceSender::<State>::new(registry());
        sender
            .input(Some(State::RotaryEncoder(Default::default())))
            .unwrap();
        assert_eq!(sender.output().unwrap(), None);
        let frame = encode(&mut sender, State::Ping(Ping::default()));
        assert!(!frame.is_empty());
    }
}
