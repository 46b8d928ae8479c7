//! Full backend pipelines: raw peer inputs through the aggregator, and
//! aggregator outputs back to raw bytes for each peer.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};

use crate::aggregator::{Aggregator, BackendSender, OutputEvent, ReceiveEvent, SendEvent};
use crate::config::SyncConfig;
use crate::device::{stage, DeviceReceiver, DeviceSender};
use crate::error::{ConstructionError, ProtocolError};
use crate::file::{FileReceiver, FileSender, StateData};
use crate::messages::Payload;
use crate::rotary::{RotaryEncoderReceiver, RotarySample};
use crate::sansio::{EventQueue, Filter};
use crate::schema::{self, LogEvent, State};
use crate::ui::{UiReceiver, UiSender};

/// UI silence, in whole seconds, after which the UI counts as delayed.
pub const FRONTEND_SILENCE_LIMIT_SECS: u64 = 1;
/// Whole seconds the UI must have been connected before it can count as delayed.
pub const FRONTEND_CONNECTED_MIN_SECS: u64 = 2;
/// Whole seconds between two delay reports.
pub const FRONTEND_REPORT_INTERVAL_SECS: u64 = 2;

/// UI socket status, reported by the host whenever it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendConnectionEvent {
    /// When the current connection was opened, on the caller's clock.
    pub last_connection_time: Duration,
    pub is_frontend_connected: bool,
}

/// Raw inputs gathered by the host in one pass of its loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerReceiveEvent {
    pub time: Option<Duration>,
    /// Bytes read from the device serial port.
    pub serial: Option<Vec<u8>>,
    /// One message body from the UI socket.
    pub websocket: Option<Vec<u8>>,
    /// Rotary encoder step count and button state.
    pub rotary: Option<(i32, bool)>,
    pub file: Option<StateData>,
    pub log_event: Option<LogEvent>,
    pub frontend: Option<FrontendConnectionEvent>,
}

impl ServerReceiveEvent {
    pub fn has_data(&self) -> bool {
        self.time.is_some()
            || self.serial.is_some()
            || self.websocket.is_some()
            || self.rotary.is_some()
            || self.file.is_some()
            || self.log_event.is_some()
            || self.frontend.is_some()
    }
}

/// Result of one receive pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerReceiveOutput {
    pub server_send: OutputEvent,
    /// The UI has stopped sending while connected; the host should restart it.
    pub frontend_delayed: bool,
}

/// Detects a connected UI that has gone silent.
#[derive(Debug, Clone, Default)]
struct FrontendWatchdog {
    last_message: Duration,
    connected: bool,
    connection_time: Duration,
    last_report: Duration,
}

impl FrontendWatchdog {
    fn update(&mut self, event: FrontendConnectionEvent) {
        self.connection_time = event.last_connection_time;
        self.connected = event.is_frontend_connected;
    }

    fn check(&mut self, now: Duration) -> bool {
        let whole_secs_since = |then: Duration| now.saturating_sub(then).as_secs();
        if whole_secs_since(self.last_message) <= FRONTEND_SILENCE_LIMIT_SECS
            || whole_secs_since(self.last_report) <= FRONTEND_REPORT_INTERVAL_SECS
            || !self.connected
            || whole_secs_since(self.connection_time) <= FRONTEND_CONNECTED_MIN_SECS
        {
            return false;
        }
        self.last_report = now;
        true
    }
}

pub struct ServerReceiver {
    buffer: EventQueue<ServerReceiveEvent>,
    current_time: Duration,
    watchdog: FrontendWatchdog,
    device: DeviceReceiver<State>,
    ui: UiReceiver<State>,
    rotary: RotaryEncoderReceiver,
    file: FileReceiver<State>,
    aggregator: Aggregator,
}

impl ServerReceiver {
    pub fn new(config: &SyncConfig) -> Result<Self, ConstructionError> {
        let aggregator = Aggregator::new(config)?;
        Ok(Self {
            buffer: EventQueue::new(),
            current_time: Duration::ZERO,
            watchdog: FrontendWatchdog::default(),
            device: DeviceReceiver::new(aggregator.device_registry()),
            ui: UiReceiver::new(aggregator.ui_registry()),
            rotary: RotaryEncoderReceiver::new(),
            file: FileReceiver::new(aggregator.device_registry()),
            aggregator,
        })
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// For seeding initial state before pumping starts.
    pub fn aggregator_mut(&mut self) -> &mut Aggregator {
        &mut self.aggregator
    }

    /// Dispatch one buffered event to the per-peer receivers.
    fn dispatch(&mut self, event: ServerReceiveEvent) -> Option<LogEvent> {
        if let Some(time) = event.time {
            self.current_time = time;
        }
        if let Some(frontend) = event.frontend {
            self.watchdog.update(frontend);
        }
        if let Err(err) = self.device.input(event.serial) {
            error!("DeviceReceiver: {err}");
        }
        if let Err(err) = self.ui.input(event.websocket) {
            error!("UiReceiver: {err}");
        }
        let rotary = event.rotary.map(|(step, button_pressed)| RotarySample {
            time: self.current_time,
            step,
            button_pressed,
        });
        if let Err(err) = self.rotary.input(rotary) {
            error!("RotaryEncoderReceiver: {err}");
        }
        if let Err(err) = self.file.input(event.file) {
            error!("FileReceiver: {err}");
        }
        event.log_event
    }

    fn pull<F: Filter>(name: &str, filter: &mut F) -> Option<F::Output> {
        filter.output().unwrap_or_else(|err| {
            error!("{name}: {err}");
            None
        })
    }

    /// One aggregator event per value pulled from the receivers, so values
    /// arriving together are all routed.
    fn collect_events(&mut self, log_event: Option<LogEvent>) -> Vec<ReceiveEvent> {
        let now = ReceiveEvent::at(self.current_time);
        let mut events = Vec::new();
        if let Some(value) = Self::pull("DeviceReceiver", &mut self.device) {
            events.push(ReceiveEvent {
                device: Some(value),
                ..now.clone()
            });
        }
        if let Some(value) = Self::pull("UiReceiver", &mut self.ui) {
            self.watchdog.last_message = self.current_time;
            events.push(ReceiveEvent {
                ui: Some(value),
                ..now.clone()
            });
        }
        if let Some(value) = Self::pull("RotaryEncoderReceiver", &mut self.rotary) {
            events.push(ReceiveEvent {
                ui: Some(State::RotaryEncoder(value)),
                ..now.clone()
            });
        }
        if let Some(value) = Self::pull("FileReceiver", &mut self.file) {
            events.push(ReceiveEvent {
                file: Some(value),
                ..now.clone()
            });
        }
        if log_event.is_some() {
            events.push(ReceiveEvent { log_event, ..now });
        }
        events
    }
}

impl Filter for ServerReceiver {
    type Input = ServerReceiveEvent;
    type Output = ServerReceiveOutput;

    fn input(&mut self, event: Option<ServerReceiveEvent>) -> Result<(), ProtocolError> {
        self.buffer.input(event.filter(ServerReceiveEvent::has_data))
    }

    /// Route whatever the receivers produce, then collect aggregator outputs
    /// until one carries data. Events not yet processed wait for the next call.
    fn output(&mut self) -> Result<Option<ServerReceiveOutput>, ProtocolError> {
        let buffered = self.buffer.pop();
        let had_event = buffered.is_some();
        let log_event = buffered.and_then(|event| self.dispatch(event));

        let mut events = self.collect_events(log_event);
        if events.is_empty() && had_event {
            events.push(ReceiveEvent::at(self.current_time));
        }
        for event in events {
            self.aggregator.input(Some(event))?;
        }

        let mut server_send = None;
        while let Some(output) = self.aggregator.output()? {
            let done = output.has_data();
            server_send = Some(output);
            if done {
                break;
            }
        }
        let Some(server_send) = server_send else {
            return Ok(None);
        };
        Ok(Some(ServerReceiveOutput {
            server_send,
            frontend_delayed: self.watchdog.check(self.current_time),
        }))
    }
}

/// Raw outputs for the host to write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerSendOutput {
    /// Framed bytes for the device serial port.
    pub serial: Option<Vec<u8>>,
    /// One message body for the UI socket.
    pub websocket: Option<Vec<u8>>,
    pub file: Option<StateData>,
}

impl ServerSendOutput {
    pub fn has_data(&self) -> bool {
        self.serial.is_some() || self.websocket.is_some() || self.file.is_some()
    }
}

pub struct ServerSender {
    backend: BackendSender,
    device: DeviceSender<State>,
    ui: UiSender<State>,
    file: FileSender<State>,
}

impl ServerSender {
    pub fn new() -> Self {
        let device = Arc::new(schema::device_registry());
        Self {
            backend: BackendSender::new(),
            device: DeviceSender::new(device.clone()),
            ui: UiSender::new(Arc::new(schema::ui_registry())),
            file: FileSender::new(device),
        }
    }
}

impl Default for ServerSender {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ServerSender {
    type Input = SendEvent;
    type Output = ServerSendOutput;

    fn input(&mut self, event: Option<SendEvent>) -> Result<(), ProtocolError> {
        self.backend.input(event)
    }

    fn output(&mut self) -> Result<Option<ServerSendOutput>, ProtocolError> {
        let Some(event) = self.backend.output()? else {
            return Ok(None);
        };
        if let Some(value) = &event.file_send {
            debug!("ServerSender: saving {}", value.kind());
        }
        Ok(Some(ServerSendOutput {
            serial: stage("DeviceSender", &mut self.device, event.device_send),
            websocket: stage("UiSender", &mut self.ui, event.ui_send),
            file: stage("FileSender", &mut self.file, event.file_send),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleSlot;
    use crate::schema::{Alarms, ParametersRequest, Ping, StateKind};

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn config() -> SyncConfig {
        SyncConfig {
            ui_schedule: vec![ScheduleSlot::new(StateKind::Alarms, 10)],
            device_schedule: vec![ScheduleSlot::new(StateKind::ParametersRequest, 10)],
            ..Default::default()
        }
    }

    fn device_frame(value: State) -> Vec<u8> {
        let mut sender = DeviceSender::<State>::new(Arc::new(schema::device_registry()));
        sender.input(Some(value)).unwrap();
        sender.output().unwrap().unwrap()
    }

    fn ui_body(value: State) -> Vec<u8> {
        let mut sender = UiSender::<State>::new(Arc::new(schema::ui_registry()));
        sender.input(Some(value)).unwrap();
        sender.output().unwrap().unwrap()
    }

    #[test]
    fn device_bytes_reach_ui_output() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        let alarms = State::Alarms(Alarms {
            time: 3,
            alarm_one: true,
            alarm_two: false,
        });
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(0)),
                serial: Some(device_frame(alarms.clone())),
                ..Default::default()
            }))
            .unwrap();
        let out = receiver.output().unwrap().unwrap();
        assert_eq!(out.server_send.ui_send, None);
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(10)),
                ..Default::default()
            }))
            .unwrap();
        let out = receiver.output().unwrap().unwrap();
        assert_eq!(out.server_send.ui_send, Some(alarms));
        assert_eq!(receiver.output().unwrap(), None);
    }

    #[test]
    fn ui_request_is_sent_to_device_as_frame() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        let request = State::ParametersRequest(ParametersRequest {
            fio2: 42.0,
            ..Default::default()
        });
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(0)),
                websocket: Some(ui_body(request.clone())),
                ..Default::default()
            }))
            .unwrap();
        receiver.output().unwrap();
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(10)),
                ..Default::default()
            }))
            .unwrap();
        let out = receiver.output().unwrap().unwrap();
        assert_eq!(out.server_send.device_send, Some(request.clone()));

        let mut sender = ServerSender::new();
        sender.input(Some(SendEvent::Output(out.server_send))).unwrap();
        let raw = sender.output().unwrap().unwrap();
        let frame = raw.serial.unwrap();
        assert_eq!(frame.last(), Some(&0));

        let mut device = DeviceReceiver::<State>::new(Arc::new(schema::device_registry()));
        device.input(Some(frame)).unwrap();
        assert_eq!(device.output().unwrap(), Some(request));
    }

    #[test]
    fn rotary_reading_stored_as_state() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(5)),
                rotary: Some((4, true)),
                ..Default::default()
            }))
            .unwrap();
        receiver.output().unwrap();
        match receiver.aggregator().states().get(StateKind::RotaryEncoder) {
            Some(State::RotaryEncoder(encoder)) => {
                assert_eq!(encoder.step, 4);
                assert!(encoder.button_pressed);
                assert_eq!(encoder.last_button_down, 0.005);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn saved_file_restores_request() {
        let request = State::ParametersRequest(ParametersRequest {
            rr: 12.0,
            ..Default::default()
        });
        let mut sender = ServerSender::new();
        sender
            .input(Some(SendEvent::Output(OutputEvent {
                file_send: Some(request.clone()),
                ..Default::default()
            })))
            .unwrap();
        let saved = sender.output().unwrap().unwrap().file.unwrap();

        let mut receiver = ServerReceiver::new(&config()).unwrap();
        receiver
            .input(Some(ServerReceiveEvent {
                file: Some(saved),
                ..Default::default()
            }))
            .unwrap();
        receiver.output().unwrap();
        assert_eq!(
            receiver
                .aggregator()
                .states()
                .get(StateKind::ParametersRequest),
            Some(&request)
        );
    }

    #[test]
    fn empty_file_is_logged_not_fatal() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(1)),
                file: Some(StateData {
                    state_type: "ParametersRequest".into(),
                    data: None,
                }),
                ..Default::default()
            }))
            .unwrap();
        assert!(receiver.output().unwrap().is_some());
    }

    #[test]
    fn ui_message_and_knob_reading_in_one_pass_are_both_routed() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        let ping = State::Ping(Ping { time: 2, id: 8 });
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(5)),
                websocket: Some(ui_body(ping.clone())),
                rotary: Some((4, true)),
                ..Default::default()
            }))
            .unwrap();
        while receiver.output().unwrap().is_some() {}
        let states = receiver.aggregator().states();
        assert_eq!(states.get(StateKind::Ping), Some(&ping));
        match states.get(StateKind::RotaryEncoder) {
            Some(State::RotaryEncoder(encoder)) => {
                assert_eq!(encoder.step, 4);
                assert!(encoder.button_pressed);
            }
            other => panic!("knob reading not stored: {other:?}"),
        }
    }

    #[test]
    fn seeded_request_goes_to_device() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        let request = State::ParametersRequest(ParametersRequest {
            vt: 300.0,
            ..Default::default()
        });
        receiver
            .aggregator_mut()
            .states_mut()
            .insert(request.clone())
            .unwrap();
        for t in [0, 10] {
            receiver
                .input(Some(ServerReceiveEvent {
                    time: Some(ms(t)),
                    ..Default::default()
                }))
                .unwrap();
        }
        assert_eq!(receiver.output().unwrap().unwrap().server_send.device_send, None);
        let out = receiver.output().unwrap().unwrap();
        assert_eq!(out.server_send.device_send, Some(request));
    }

    fn tick(receiver: &mut ServerReceiver, time_ms: u64, websocket: Option<Vec<u8>>) -> bool {
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(time_ms)),
                websocket,
                ..Default::default()
            }))
            .unwrap();
        receiver.output().unwrap().unwrap().frontend_delayed
    }

    #[test]
    fn silent_frontend_is_reported_as_delayed() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        receiver
            .input(Some(ServerReceiveEvent {
                time: Some(ms(0)),
                frontend: Some(FrontendConnectionEvent {
                    last_connection_time: ms(0),
                    is_frontend_connected: true,
                }),
                ..Default::default()
            }))
            .unwrap();
        assert!(!receiver.output().unwrap().unwrap().frontend_delayed);

        // Silent, but not yet connected for more than two whole seconds.
        assert!(!tick(&mut receiver, 1_500, None));
        assert!(!tick(&mut receiver, 2_900, None));
        assert!(tick(&mut receiver, 3_000, None));
        // Reports are at least two whole seconds apart.
        assert!(!tick(&mut receiver, 4_000, None));
        assert!(!tick(&mut receiver, 5_900, None));
        assert!(tick(&mut receiver, 6_000, None));

        let ping = ui_body(State::Ping(Ping { time: 0, id: 1 }));
        assert!(!tick(&mut receiver, 9_000, Some(ping)));
        assert!(!tick(&mut receiver, 10_500, None));
        assert!(tick(&mut receiver, 11_000, None));
    }

    #[test]
    fn disconnected_frontend_is_never_delayed() {
        let mut receiver = ServerReceiver::new(&config()).unwrap();
        for t in [0, 3_000, 6_000, 9_000] {
            assert!(!tick(&mut receiver, t, None));
        }
    }
}
