//! Latest-value state replication on a rotating deadline schedule.
//!
//! A [`StateMap`] holds the newest value of every known state type. Several
//! [`StateSynchronizer`]s can share one map: the owner passes it to each call,
//! so updates made through one synchronizer are visible to all of them.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::error::{ConstructionError, DataError, ProtocolError};
use crate::messages::{Payload, Registry};

/// Latest value of each state type, `None` until one is received.
#[derive(Debug, Clone)]
pub struct StateMap<P: Payload> {
    states: BTreeMap<P::Kind, Option<P>>,
}

impl<P: Payload> StateMap<P> {
    /// One empty slot per kind in `registry`.
    pub fn new(registry: &Registry<P::Kind>) -> Self {
        Self {
            states: registry.kinds().map(|kind| (kind, None)).collect(),
        }
    }

    pub fn get(&self, kind: P::Kind) -> Option<&P> {
        self.states.get(&kind).and_then(Option::as_ref)
    }

    pub fn contains_kind(&self, kind: P::Kind) -> bool {
        self.states.contains_key(&kind)
    }

    /// Store `value` in its kind's slot. Returns the value back if the map has no such slot.
    pub fn insert(&mut self, value: P) -> Result<(), P> {
        match self.states.get_mut(&value.kind()) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (P::Kind, Option<&P>)> {
        self.states.iter().map(|(kind, value)| (*kind, value.as_ref()))
    }
}

/// One slot of an output schedule: wait `wait` after the previous output, then send `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry<K> {
    pub wait: Duration,
    pub kind: K,
}

impl<K> ScheduleEntry<K> {
    pub fn new(wait: Duration, kind: K) -> Self {
        Self { wait, kind }
    }
}

/// Input to a [`StateSynchronizer`]: a clock tick, a new value, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent<P> {
    pub time: Option<Duration>,
    pub value: Option<P>,
}

impl<P> UpdateEvent<P> {
    pub fn time(time: Duration) -> Self {
        Self {
            time: Some(time),
            value: None,
        }
    }

    pub fn value(value: P) -> Self {
        Self {
            time: None,
            value: Some(value),
        }
    }
}

/// Accepts values of its registry's kinds into a shared [`StateMap`] and emits
/// one scheduled value each time the current schedule slot's deadline passes.
#[derive(Debug, Clone)]
pub struct StateSynchronizer<P: Payload> {
    registry: Registry<P::Kind>,
    schedule: VecDeque<ScheduleEntry<P::Kind>>,
    current_time: Duration,
    output_deadline: Option<Duration>,
}

impl<P: Payload> StateSynchronizer<P> {
    pub fn new(
        registry: Registry<P::Kind>,
        schedule: impl IntoIterator<Item = ScheduleEntry<P::Kind>>,
    ) -> Result<Self, ConstructionError> {
        let schedule: VecDeque<_> = schedule.into_iter().collect();
        if schedule.is_empty() {
            return Err(ConstructionError::EmptySchedule);
        }
        Ok(Self {
            registry,
            schedule,
            current_time: Duration::ZERO,
            output_deadline: None,
        })
    }

    pub fn registry(&self) -> &Registry<P::Kind> {
        &self.registry
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn output_deadline(&self) -> Option<Duration> {
        self.output_deadline
    }

    /// A state map covering this synchronizer's registry.
    pub fn new_state_map(&self) -> StateMap<P> {
        StateMap::new(&self.registry)
    }

    /// Apply a clock tick and/or store a value. A value whose kind is not
    /// registered here is rejected and `states` is left unchanged.
    pub fn input(
        &mut self,
        states: &mut StateMap<P>,
        event: Option<UpdateEvent<P>>,
    ) -> Result<(), ProtocolError> {
        let Some(event) = event else {
            return Ok(());
        };
        if let Some(time) = event.time {
            self.current_time = time;
            if self.output_deadline.is_none() {
                self.output_deadline = Some(time + self.head().wait);
            }
        }
        if let Some(value) = event.value {
            let kind = value.kind();
            if !self.registry.contains(kind) {
                return Err(DataError::UnregisteredType(P::kind_name(kind).to_string()).into());
            }
            states
                .insert(value)
                .map_err(|_| DataError::UnregisteredType(P::kind_name(kind).to_string()))?;
        }
        Ok(())
    }

    /// Emit the head slot's value once its deadline has passed, then rotate
    /// the schedule. A slot whose state has no value yet still uses its turn.
    pub fn output(&mut self, states: &StateMap<P>) -> Result<Option<P>, ProtocolError> {
        let Some(deadline) = self.output_deadline else {
            return Ok(None);
        };
        if self.current_time < deadline {
            return Ok(None);
        }
        let kind = self.head().kind;
        if !self.registry.contains(kind) || !states.contains_kind(kind) {
            return Err(DataError::UnregisteredType(P::kind_name(kind).to_string()).into());
        }
        let result = states.get(kind).cloned();
        self.schedule.rotate_left(1);
        self.output_deadline = Some(self.current_time + self.head().wait);
        Ok(result)
    }

    fn head(&self) -> ScheduleEntry<P::Kind> {
        // Non-empty by construction.
        self.schedule[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, Alarms, Ping, RotaryEncoder, State, StateKind};

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn entry(wait: f64, kind: StateKind) -> ScheduleEntry<StateKind> {
        ScheduleEntry::new(secs(wait), kind)
    }

    fn ping(id: u32) -> State {
        State::Ping(Ping { time: 0, id })
    }

    #[test]
    fn empty_schedule_rejected() {
        assert!(matches!(
            StateSynchronizer::<State>::new(schema::device_registry(), []),
            Err(ConstructionError::EmptySchedule)
        ));
    }

    #[test]
    fn emits_after_deadline() {
        let mut sync =
            StateSynchronizer::new(schema::device_registry(), [entry(1.0, StateKind::Ping)])
                .unwrap();
        let mut states = sync.new_state_map();
        sync.input(
            &mut states,
            Some(UpdateEvent {
                time: Some(secs(0.0)),
                value: Some(ping(1)),
            }),
        )
        .unwrap();
        assert_eq!(sync.output_deadline(), Some(secs(1.0)));
        sync.input(&mut states, Some(UpdateEvent::time(secs(0.9))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), None);
        sync.input(&mut states, Some(UpdateEvent::time(secs(1.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), Some(ping(1)));
        assert_eq!(sync.output(&states).unwrap(), None);
        assert_eq!(sync.output_deadline(), Some(secs(2.0)));
    }

    #[test]
    fn rotates_through_schedule() {
        let mut sync = StateSynchronizer::new(
            schema::device_registry(),
            [
                entry(1.0, StateKind::Ping),
                entry(2.0, StateKind::Ping),
                entry(3.0, StateKind::Ping),
            ],
        )
        .unwrap();
        let mut states = sync.new_state_map();
        sync.input(
            &mut states,
            Some(UpdateEvent {
                time: Some(secs(0.0)),
                value: Some(ping(7)),
            }),
        )
        .unwrap();
        assert_eq!(sync.output_deadline(), Some(secs(1.0)));
        sync.input(&mut states, Some(UpdateEvent::time(secs(1.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), Some(ping(7)));
        assert_eq!(sync.output_deadline(), Some(secs(3.0)));
        sync.input(&mut states, Some(UpdateEvent::time(secs(3.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), Some(ping(7)));
        assert_eq!(sync.output_deadline(), Some(secs(6.0)));
        sync.input(&mut states, Some(UpdateEvent::time(secs(6.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), Some(ping(7)));
        assert_eq!(sync.output_deadline(), Some(secs(7.0)));
    }

    #[test]
    fn empty_slot_still_consumes_turn() {
        let mut sync = StateSynchronizer::new(
            schema::device_registry(),
            [entry(1.0, StateKind::Alarms), entry(1.0, StateKind::Ping)],
        )
        .unwrap();
        let mut states = sync.new_state_map();
        sync.input(&mut states, Some(UpdateEvent::value(ping(2))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), None);
        sync.input(&mut states, Some(UpdateEvent::time(secs(0.0))))
            .unwrap();
        sync.input(&mut states, Some(UpdateEvent::time(secs(1.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), None);
        assert_eq!(sync.output_deadline(), Some(secs(2.0)));
        sync.input(&mut states, Some(UpdateEvent::time(secs(2.0))))
            .unwrap();
        assert_eq!(sync.output(&states).unwrap(), Some(ping(2)));
    }

    #[test]
    fn unregistered_value_leaves_map_untouched() {
        let mut sync =
            StateSynchronizer::new(schema::device_registry(), [entry(1.0, StateKind::Ping)])
                .unwrap();
        let mut states = StateMap::new(&schema::ui_registry());
        let result = sync.input(
            &mut states,
            Some(UpdateEvent::value(State::RotaryEncoder(RotaryEncoder::default()))),
        );
        assert!(matches!(
            result,
            Err(ProtocolError::Data(DataError::UnregisteredType(_)))
        ));
        assert!(states.get(StateKind::RotaryEncoder).is_none());
    }

    #[test]
    fn new_map_has_one_empty_slot_per_kind() {
        let mut states = StateMap::<State>::new(&schema::device_registry());
        assert!(states.contains_kind(StateKind::Ping));
        assert!(!states.contains_kind(StateKind::RotaryEncoder));
        assert_eq!(states.iter().count(), 12);
        assert!(states.iter().all(|(_, value)| value.is_none()));
        states.insert(ping(3)).unwrap();
        let filled: Vec<StateKind> = states
            .iter()
            .filter_map(|(kind, value)| value.map(|_| kind))
            .collect();
        assert_eq!(filled, vec![StateKind::Ping]);
    }

    #[test]
    fn map_without_scheduled_slot_is_an_error() {
        let mut sync = StateSynchronizer::<State>::new(
            schema::ui_registry(),
            [entry(1.0, StateKind::RotaryEncoder)],
        )
        .unwrap();
        let mut states = StateMap::new(&schema::device_registry());
        sync.input(&mut states, Some(UpdateEvent::time(secs(1.0))))
            .unwrap();
        sync.input(&mut states, Some(UpdateEvent::time(secs(2.0))))
            .unwrap();
        assert!(matches!(
            sync.output(&states),
            Err(ProtocolError::Data(DataError::UnregisteredType(_)))
        ));
    }

    #[test]
    fn shared_map_is_visible_to_every_synchronizer() {
        let mut a =
            StateSynchronizer::new(schema::device_registry(), [entry(0.5, StateKind::Alarms)])
                .unwrap();
        let mut b =
            StateSynchronizer::new(schema::ui_registry(), [entry(0.5, StateKind::Alarms)])
                .unwrap();
        let mut states = b.new_state_map();
        let alarms = State::Alarms(Alarms {
            time: 1,
            alarm_one: true,
            alarm_two: false,
        });
        a.input(&mut states, Some(UpdateEvent::value(alarms.clone())))
            .unwrap();
        b.input(&mut states, Some(UpdateEvent::time(secs(0.0))))
            .unwrap();
        b.input(&mut states, Some(UpdateEvent::time(secs(0.5))))
            .unwrap();
        assert_eq!(b.output(&states).unwrap(), Some(alarms));
    }
}
