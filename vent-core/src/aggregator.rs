//! Backend state aggregation. Inbound values from the device, the UI and
//! state files update one shared [`StateMap`]; three synchronizers replicate
//! it to the device, the UI and the state files on their own schedules, and
//! the event log is served to the UI in segments.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};

use crate::config::{ScheduleSlot, SyncConfig};
use crate::error::{ConstructionError, ProtocolError};
use crate::lists::{ListSendSynchronizer, ListUpdate};
use crate::messages::{Payload, Registry};
use crate::sansio::{EventQueue, Filter};
use crate::schema::{self, Announcement, LogEvent, NextLogEvents, State, StateKind};
use crate::states::{ScheduleEntry, StateMap, StateSynchronizer, UpdateEvent};

/// Announcement body sent when none is given.
pub const DEFAULT_ANNOUNCEMENT: &[u8] = b"ping";

/// Aggregator input. Any combination of fields may be set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceiveEvent {
    pub time: Option<Duration>,
    pub device: Option<State>,
    pub ui: Option<State>,
    pub file: Option<State>,
    /// New event log entry; its id is assigned by the aggregator.
    pub log_event: Option<LogEvent>,
}

impl ReceiveEvent {
    pub fn at(time: Duration) -> Self {
        Self {
            time: Some(time),
            ..Default::default()
        }
    }

    pub fn has_data(&self) -> bool {
        self.time.is_some()
            || self.device.is_some()
            || self.ui.is_some()
            || self.file.is_some()
            || self.log_event.is_some()
    }
}

/// Values due to be sent to each peer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputEvent {
    pub device_send: Option<State>,
    pub ui_send: Option<State>,
    pub file_send: Option<State>,
}

impl OutputEvent {
    pub fn has_data(&self) -> bool {
        self.device_send.is_some() || self.ui_send.is_some() || self.file_send.is_some()
    }
}

fn schedule(slots: &[ScheduleSlot]) -> Vec<ScheduleEntry<StateKind>> {
    slots.iter().copied().map(ScheduleEntry::from).collect()
}

fn log_dropped(name: &str, err: ProtocolError) {
    error!("{name} StateSynchronizer: {err}");
}

pub struct Aggregator {
    buffer: EventQueue<ReceiveEvent>,
    current_time: Duration,
    states: StateMap<State>,
    device_sync: StateSynchronizer<State>,
    ui_sync: StateSynchronizer<State>,
    file_sync: StateSynchronizer<State>,
    event_log: ListSendSynchronizer<NextLogEvents>,
    next_log_id: u32,
    device_inputs: BTreeSet<StateKind>,
    ui_inputs: BTreeSet<StateKind>,
    file_inputs: BTreeSet<StateKind>,
}

impl Aggregator {
    pub fn new(config: &SyncConfig) -> Result<Self, ConstructionError> {
        config.validate()?;
        let device = schema::device_registry();
        let ui = schema::ui_registry();
        Ok(Self {
            buffer: EventQueue::new(),
            current_time: Duration::ZERO,
            // The UI registry covers every kind the device and files use.
            states: StateMap::new(&ui),
            device_sync: StateSynchronizer::new(device.clone(), schedule(&config.device_schedule))?,
            ui_sync: StateSynchronizer::new(ui, schedule(&config.ui_schedule))?,
            file_sync: StateSynchronizer::new(device, schedule(&config.file_schedule))?,
            event_log: ListSendSynchronizer::new(
                config.event_log.max_len,
                config.event_log.max_segment_len,
            )?,
            next_log_id: 0,
            device_inputs: config.device_inputs.iter().copied().collect(),
            ui_inputs: config.ui_inputs.iter().copied().collect(),
            file_inputs: config.file_inputs.iter().copied().collect(),
        })
    }

    pub fn states(&self) -> &StateMap<State> {
        &self.states
    }

    /// For seeding initial state before pumping starts.
    pub fn states_mut(&mut self) -> &mut StateMap<State> {
        &mut self.states
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    /// Registry the device link must be built with.
    pub fn device_registry(&self) -> Arc<Registry<StateKind>> {
        Arc::new(self.device_sync.registry().clone())
    }

    /// Registry the UI link must be built with.
    pub fn ui_registry(&self) -> Arc<Registry<StateKind>> {
        Arc::new(self.ui_sync.registry().clone())
    }

    fn tick(&mut self) {
        let now = Some(UpdateEvent::time(self.current_time));
        for (name, sync) in [
            ("Device", &mut self.device_sync),
            ("UI", &mut self.ui_sync),
            ("File", &mut self.file_sync),
        ] {
            if let Err(err) = sync.input(&mut self.states, now.clone()) {
                log_dropped(name, err);
            }
        }
    }

    fn append_log_event(&mut self, mut event: LogEvent) {
        event.id = self.next_log_id;
        self.next_log_id = self.next_log_id.wrapping_add(1);
        if let Err(err) = self.event_log.input(Some(ListUpdate::element(event))) {
            error!("ListSendSynchronizer: {err}");
        }
    }

    fn receive_device(&mut self, value: State) {
        if !self.device_inputs.contains(&value.kind()) {
            debug!("Aggregator: ignoring {} from device", value.kind());
            return;
        }
        if let Err(err) = self
            .device_sync
            .input(&mut self.states, Some(UpdateEvent::value(value)))
        {
            log_dropped("Device", err);
        }
    }

    fn receive_ui(&mut self, value: State) {
        if !self.ui_inputs.contains(&value.kind()) {
            debug!("Aggregator: ignoring {} from UI", value.kind());
            return;
        }
        if let State::ExpectedLogEvent(expected) = &value {
            if let Err(err) = self
                .event_log
                .input(Some(ListUpdate::request(expected.id)))
            {
                error!("ListSendSynchronizer: {err}");
            }
            return;
        }
        if let Err(err) = self
            .ui_sync
            .input(&mut self.states, Some(UpdateEvent::value(value)))
        {
            log_dropped("UI", err);
        }
    }

    fn receive_file(&mut self, value: State) {
        if !self.file_inputs.contains(&value.kind()) {
            debug!("Aggregator: ignoring {} from file", value.kind());
            return;
        }
        if let Err(err) = self
            .file_sync
            .input(&mut self.states, Some(UpdateEvent::value(value)))
        {
            log_dropped("File", err);
        }
    }

    fn serve_event_log(&mut self) {
        match self.event_log.output() {
            Ok(Some(segment)) => {
                if let Err(rejected) = self.states.insert(State::NextLogEvents(segment)) {
                    error!("Aggregator: no state slot for {}", rejected.kind());
                }
            }
            Ok(None) => {}
            Err(err) => error!("ListSendSynchronizer: {err}"),
        }
    }

    fn scheduled(
        name: &str,
        sync: &mut StateSynchronizer<State>,
        states: &StateMap<State>,
    ) -> Option<State> {
        sync.output(states).unwrap_or_else(|err| {
            log_dropped(name, err);
            None
        })
    }
}

impl Filter for Aggregator {
    type Input = ReceiveEvent;
    type Output = OutputEvent;

    fn input(&mut self, event: Option<ReceiveEvent>) -> Result<(), ProtocolError> {
        self.buffer.input(event.filter(ReceiveEvent::has_data))
    }

    /// Process one buffered event and collect at most one scheduled value per peer.
    fn output(&mut self) -> Result<Option<OutputEvent>, ProtocolError> {
        let Some(event) = self.buffer.pop() else {
            return Ok(None);
        };
        if let Some(time) = event.time {
            self.current_time = time;
        }
        self.tick();
        if let Some(log_event) = event.log_event {
            self.append_log_event(log_event);
        }
        if let Some(value) = event.device {
            self.receive_device(value);
        }
        if let Some(value) = event.ui {
            self.receive_ui(value);
        }
        if let Some(value) = event.file {
            self.receive_file(value);
        }
        self.serve_event_log();
        Ok(Some(OutputEvent {
            device_send: Self::scheduled("Device", &mut self.device_sync, &self.states),
            ui_send: Self::scheduled("UI", &mut self.ui_sync, &self.states),
            file_send: Self::scheduled("File", &mut self.file_sync, &self.states),
        }))
    }
}

/// Input to [`BackendSender`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendEvent {
    Output(OutputEvent),
    /// Sent to both the device and the UI.
    Announcement(Vec<u8>),
}

impl SendEvent {
    pub fn announcement() -> Self {
        SendEvent::Announcement(DEFAULT_ANNOUNCEMENT.to_vec())
    }
}

/// Turns send events into per-peer output events.
#[derive(Debug, Clone, Default)]
pub struct BackendSender {
    buffer: EventQueue<SendEvent>,
}

impl BackendSender {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for BackendSender {
    type Input = SendEvent;
    type Output = OutputEvent;

    fn input(&mut self, event: Option<SendEvent>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<OutputEvent>, ProtocolError> {
        Ok(self.buffer.pop().map(|event| match event {
            SendEvent::Output(output) => output,
            SendEvent::Announcement(message) => {
                let announcement = State::Announcement(Announcement {
                    time: 0,
                    announcement: message,
                });
                OutputEvent {
                    device_send: Some(announcement.clone()),
                    ui_send: Some(announcement),
                    file_send: None,
                }
            }
        }))
    }
}
