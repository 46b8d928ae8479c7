//! Ventilator message schema: every state type exchanged with the device and
//! the UI, the `State` union over them, and the two type registries.

use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::lists::{HasId, ListSegmentShape};
use crate::messages::{Payload, Registry};

/// Inclusive numeric range, used for alarm limits.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub lower: i32,
    pub upper: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VentilationMode {
    #[default]
    Hfnc,
    PcAc,
    VcAc,
    NivPc,
    NivPs,
    Psv,
    Prvc,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Alarms {
    pub time: u64,
    pub alarm_one: bool,
    pub alarm_two: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorMeasurements {
    pub time: u64,
    pub cycle: u32,
    pub fio2: f32,
    pub spo2: f32,
    pub hr: f32,
    pub paw: f32,
    pub flow: f32,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleMeasurements {
    pub time: u64,
    pub vt: f32,
    pub rr: f32,
    pub peep: f32,
    pub pip: f32,
    pub ip: f32,
    pub ve: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Parameters {
    pub time: u64,
    pub ventilating: bool,
    pub mode: VentilationMode,
    pub fio2: f32,
    pub flow: f32,
    pub pip: f32,
    pub peep: f32,
    pub vt: f32,
    pub rr: f32,
    pub ie: f32,
}

/// Same fields as [`Parameters`], sent as a request for new settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParametersRequest {
    pub time: u64,
    pub ventilating: bool,
    pub mode: VentilationMode,
    pub fio2: f32,
    pub flow: f32,
    pub pip: f32,
    pub peep: f32,
    pub vt: f32,
    pub rr: f32,
    pub ie: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlarmLimits {
    pub time: u64,
    pub fio2: Option<Range>,
    pub flow: Option<Range>,
    pub spo2: Option<Range>,
    pub hr: Option<Range>,
    pub rr: Option<Range>,
    pub pip: Option<Range>,
    pub peep: Option<Range>,
    pub ip_above_peep: Option<Range>,
    pub insp_time: Option<Range>,
    pub paw: Option<Range>,
    pub mve: Option<Range>,
    pub tv: Option<Range>,
    pub etco2: Option<Range>,
    pub apnea: Option<Range>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlarmLimitsRequest {
    pub time: u64,
    pub fio2: Option<Range>,
    pub flow: Option<Range>,
    pub spo2: Option<Range>,
    pub hr: Option<Range>,
    pub rr: Option<Range>,
    pub pip: Option<Range>,
    pub peep: Option<Range>,
    pub ip_above_peep: Option<Range>,
    pub insp_time: Option<Range>,
    pub paw: Option<Range>,
    pub mve: Option<Range>,
    pub tv: Option<Range>,
    pub etco2: Option<Range>,
    pub apnea: Option<Range>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogEventCode {
    #[default]
    Fio2TooLow,
    Fio2TooHigh,
    Spo2TooLow,
    Spo2TooHigh,
    RrTooLow,
    RrTooHigh,
    HrTooLow,
    HrTooHigh,
    BatteryLow,
    ScreenLocked,
    VentilationOperationChanged,
    VentilationModeChanged,
    Fio2SettingChanged,
    FlowSettingChanged,
    Fio2AlarmLimitsChanged,
    Spo2AlarmLimitsChanged,
    HrAlarmLimitsChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogEventType {
    #[default]
    Patient,
    System,
    Control,
    AlarmLimits,
}

/// One entry of the append-only event log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: u32,
    pub time: u64,
    pub code: LogEventCode,
    pub event_type: LogEventType,
    pub old_float: f32,
    pub new_float: f32,
    pub old_bool: bool,
    pub new_bool: bool,
    pub old_range: Option<Range>,
    pub new_range: Option<Range>,
    pub old_mode: VentilationMode,
    pub new_mode: VentilationMode,
}

impl HasId for LogEvent {
    fn id(&self) -> u32 {
        self.id
    }
}

/// Sent by a log consumer: the id of the next event it has not yet received.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpectedLogEvent {
    pub id: u32,
}

/// A segment of the event log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NextLogEvents {
    pub next_expected: u32,
    pub total: u32,
    pub remaining: u32,
    pub elements: Vec<LogEvent>,
}

impl ListSegmentShape for NextLogEvents {
    type Element = LogEvent;

    fn from_parts(next_expected: u32, total: u32, remaining: u32, elements: Vec<LogEvent>) -> Self {
        Self {
            next_expected,
            total,
            remaining,
            elements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveLogEvents {
    pub id: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ping {
    pub time: u64,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Announcement {
    pub time: u64,
    pub announcement: Vec<u8>,
}

/// Knob state reported by the local rotary encoder. Times are seconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RotaryEncoder {
    pub step: i32,
    pub last_step_change: f64,
    pub button_pressed: bool,
    pub last_button_down: f64,
    pub last_button_up: f64,
}

macro_rules! states {
    ($($name:ident),+ $(,)?) => {
        /// Tag naming one state type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum StateKind {
            $($name,)+
        }

        impl StateKind {
            pub const ALL: &'static [StateKind] = &[$(StateKind::$name,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(StateKind::$name => stringify!($name),)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($name) => Some(StateKind::$name),)+
                    _ => None,
                }
            }
        }

        /// A value of any state type.
        #[derive(Debug, Clone, PartialEq)]
        pub enum State {
            $($name($name),)+
        }

        $(
            impl From<$name> for State {
                fn from(value: $name) -> Self {
                    State::$name(value)
                }
            }
        )+

        impl Payload for State {
            type Kind = StateKind;

            fn kind(&self) -> StateKind {
                match self {
                    $(State::$name(_) => StateKind::$name,)+
                }
            }

            fn kind_name(kind: StateKind) -> &'static str {
                kind.name()
            }

            fn to_bytes(&self) -> Result<Vec<u8>, DataError> {
                let result = match self {
                    $(State::$name(value) => bincode::serialize(value),)+
                };
                result.map_err(|e| DataError::PayloadSerialize {
                    kind: self.kind().name().to_string(),
                    reason: e.to_string(),
                })
            }

            fn from_bytes(kind: StateKind, bytes: &[u8]) -> Result<Self, DataError> {
                let result = match kind {
                    $(StateKind::$name => bincode::deserialize::<$name>(bytes).map(State::$name),)+
                };
                result.map_err(|e| DataError::PayloadDeserialize {
                    kind: kind.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    };
}

states!(
    Alarms,
    SensorMeasurements,
    CycleMeasurements,
    Parameters,
    ParametersRequest,
    AlarmLimits,
    AlarmLimitsRequest,
    ExpectedLogEvent,
    NextLogEvents,
    ActiveLogEvents,
    Ping,
    Announcement,
    RotaryEncoder,
);

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Codes shared by the device link, the UI link and state files.
const DEVICE_CODES: [(u8, StateKind); 12] = [
    (1, StateKind::Alarms),
    (2, StateKind::SensorMeasurements),
    (3, StateKind::CycleMeasurements),
    (4, StateKind::Parameters),
    (5, StateKind::ParametersRequest),
    (6, StateKind::AlarmLimits),
    (7, StateKind::AlarmLimitsRequest),
    (8, StateKind::ExpectedLogEvent),
    (9, StateKind::NextLogEvents),
    (10, StateKind::ActiveLogEvents),
    (254, StateKind::Ping),
    (255, StateKind::Announcement),
];

/// Codes only the UI link carries.
const UI_ONLY_CODES: [(u8, StateKind); 1] = [(128, StateKind::RotaryEncoder)];

/// Registry for the device link.
pub fn device_registry() -> Registry<StateKind> {
    Registry::from_table(&DEVICE_CODES)
}

/// Registry for the UI link: the device registry plus UI-only types.
pub fn ui_registry() -> Registry<StateKind> {
    let mut registry = Registry::from_table(&DEVICE_CODES);
    registry.extend_table(&UI_ONLY_CODES);
    registry
}
