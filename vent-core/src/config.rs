//! Synchronization settings: output schedules, input allowlists and event log
//! limits. Every field has a default, so an empty table is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;
use crate::lists::MAX_LEN_LIMIT;
use crate::schema::StateKind;
use crate::states::ScheduleEntry;

/// One schedule slot as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSlot {
    pub kind: StateKind,
    pub wait_ms: u64,
}

impl ScheduleSlot {
    pub const fn new(kind: StateKind, wait_ms: u64) -> Self {
        Self { kind, wait_ms }
    }
}

impl From<ScheduleSlot> for ScheduleEntry<StateKind> {
    fn from(slot: ScheduleSlot) -> Self {
        ScheduleEntry::new(Duration::from_millis(slot.wait_ms), slot.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventLogConfig {
    /// Events retained before the oldest are evicted.
    #[serde(default = "default_max_len")]
    pub max_len: u64,
    /// Events per `NextLogEvents` segment.
    #[serde(default = "default_max_segment_len")]
    pub max_segment_len: usize,
}

fn default_max_len() -> u64 {
    u32::MAX as u64
}
fn default_max_segment_len() -> usize {
    20
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            max_segment_len: default_max_segment_len(),
        }
    }
}

/// Aggregator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// States sent to the device, in rotation.
    #[serde(default = "default_device_schedule")]
    pub device_schedule: Vec<ScheduleSlot>,
    /// States sent to the UI, in rotation.
    #[serde(default = "default_ui_schedule")]
    pub ui_schedule: Vec<ScheduleSlot>,
    /// States written to state files, in rotation.
    #[serde(default = "default_file_schedule")]
    pub file_schedule: Vec<ScheduleSlot>,
    /// State types accepted from the device.
    #[serde(default = "default_device_inputs")]
    pub device_inputs: Vec<StateKind>,
    /// State types accepted from the UI.
    #[serde(default = "default_ui_inputs")]
    pub ui_inputs: Vec<StateKind>,
    /// State types accepted from state files.
    #[serde(default = "default_file_inputs")]
    pub file_inputs: Vec<StateKind>,
    #[serde(default)]
    pub event_log: EventLogConfig,
}

fn default_device_schedule() -> Vec<ScheduleSlot> {
    vec![
        ScheduleSlot::new(StateKind::ParametersRequest, 50),
        ScheduleSlot::new(StateKind::AlarmLimitsRequest, 50),
    ]
}

fn default_ui_schedule() -> Vec<ScheduleSlot> {
    use StateKind::*;
    [
        SensorMeasurements,
        Parameters,
        Alarms,
        SensorMeasurements,
        RotaryEncoder,
        Alarms,
        SensorMeasurements,
        ParametersRequest,
        CycleMeasurements,
        AlarmLimits,
        AlarmLimitsRequest,
        NextLogEvents,
        ActiveLogEvents,
    ]
    .into_iter()
    .map(|kind| ScheduleSlot::new(kind, 10))
    .collect()
}

fn default_file_schedule() -> Vec<ScheduleSlot> {
    vec![
        ScheduleSlot::new(StateKind::ParametersRequest, 1000),
        ScheduleSlot::new(StateKind::AlarmLimitsRequest, 1000),
    ]
}

fn default_device_inputs() -> Vec<StateKind> {
    vec![
        StateKind::Alarms,
        StateKind::SensorMeasurements,
        StateKind::CycleMeasurements,
        StateKind::Parameters,
        StateKind::AlarmLimits,
        StateKind::ActiveLogEvents,
    ]
}

fn default_ui_inputs() -> Vec<StateKind> {
    vec![
        StateKind::ParametersRequest,
        StateKind::AlarmLimitsRequest,
        StateKind::Ping,
        StateKind::Announcement,
        StateKind::RotaryEncoder,
        StateKind::ExpectedLogEvent,
    ]
}

fn default_file_inputs() -> Vec<StateKind> {
    vec![StateKind::ParametersRequest, StateKind::AlarmLimitsRequest]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_schedule: default_device_schedule(),
            ui_schedule: default_ui_schedule(),
            file_schedule: default_file_schedule(),
            device_inputs: default_device_inputs(),
            ui_inputs: default_ui_inputs(),
            file_inputs: default_file_inputs(),
            event_log: EventLogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Check the limits constructors would reject, without building anything.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        for schedule in [&self.device_schedule, &self.ui_schedule, &self.file_schedule] {
            if schedule.is_empty() {
                return Err(ConstructionError::EmptySchedule);
            }
        }
        if self.event_log.max_len == 0 || self.event_log.max_len > MAX_LEN_LIMIT {
            return Err(ConstructionError::MaxLen(self.event_log.max_len));
        }
        if self.event_log.max_segment_len == 0 {
            return Err(ConstructionError::MaxSegmentLen);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ui_schedule.len(), 13);
        assert_eq!(config.device_schedule[0].kind, StateKind::ParametersRequest);
    }

    #[test]
    fn schedule_slot_to_entry() {
        let entry: ScheduleEntry<StateKind> = ScheduleSlot::new(StateKind::Ping, 250).into();
        assert_eq!(entry.wait, Duration::from_millis(250));
        assert_eq!(entry.kind, StateKind::Ping);
    }

    #[test]
    fn empty_schedule_invalid() {
        let config = SyncConfig {
            file_schedule: vec![],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConstructionError::EmptySchedule)
        ));
    }

    #[test]
    fn event_log_limits_checked() {
        let mut config = SyncConfig::default();
        config.event_log.max_segment_len = 0;
        assert!(matches!(
            config.validate(),
            Err(ConstructionError::MaxSegmentLen)
        ));
    }
}
