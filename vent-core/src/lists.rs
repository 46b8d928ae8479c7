//! Bounded append-only list replication. The peer reports the id it expects
//! next; each request is answered with a segment starting at that id.

use std::collections::VecDeque;

use log::warn;

use crate::error::{ConstructionError, DataError, ProtocolError};
use crate::sansio::{EventQueue, Filter};

/// Largest accepted `max_len`.
pub const MAX_LEN_LIMIT: u64 = 1 << 32;
pub const DEFAULT_MAX_LEN: usize = u32::MAX as usize;
pub const DEFAULT_MAX_SEGMENT_LEN: usize = 256;

/// A list element identified by a monotonically assigned id.
pub trait HasId {
    fn id(&self) -> u32;
}

/// Shape of the segment sent in response to a request.
pub trait ListSegmentShape {
    type Element: HasId + Clone;

    fn from_parts(
        next_expected: u32,
        total: u32,
        remaining: u32,
        elements: Vec<Self::Element>,
    ) -> Self;
}

/// Input to [`ListSendSynchronizer`]: a request, a new element, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct ListUpdate<E> {
    pub next_expected: Option<u32>,
    pub new_element: Option<E>,
}

impl<E> ListUpdate<E> {
    pub fn request(next_expected: u32) -> Self {
        Self {
            next_expected: Some(next_expected),
            new_element: None,
        }
    }

    pub fn element(element: E) -> Self {
        Self {
            next_expected: None,
            new_element: Some(element),
        }
    }
}

/// Retains the newest `max_len` elements and serves segments of at most
/// `max_segment_len` of them per request.
#[derive(Debug, Clone)]
pub struct ListSendSynchronizer<S: ListSegmentShape> {
    max_len: usize,
    max_segment_len: usize,
    elements: VecDeque<S::Element>,
    requests: EventQueue<u32>,
    next_expected: u32,
    next_expected_index: usize,
}

impl<S: ListSegmentShape> ListSendSynchronizer<S> {
    pub fn new(max_len: u64, max_segment_len: usize) -> Result<Self, ConstructionError> {
        if max_len == 0 || max_len > MAX_LEN_LIMIT {
            return Err(ConstructionError::MaxLen(max_len));
        }
        if max_segment_len == 0 {
            return Err(ConstructionError::MaxSegmentLen);
        }
        Ok(Self {
            max_len: usize::try_from(max_len).unwrap_or(usize::MAX),
            max_segment_len,
            elements: VecDeque::new(),
            requests: EventQueue::new(),
            next_expected: 0,
            next_expected_index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Retained elements, oldest first.
    pub fn elements(&self) -> impl Iterator<Item = &S::Element> {
        self.elements.iter()
    }

    fn append(&mut self, element: S::Element) {
        self.elements.push_back(element);
        while self.elements.len() > self.max_len {
            let Some(evicted) = self.elements.pop_front() else {
                break;
            };
            if self.next_expected_index > 0 {
                self.next_expected_index -= 1;
            } else {
                warn!(
                    "ListSendSynchronizer: discarding element {} without sending it",
                    evicted.id()
                );
            }
        }
    }

    fn segment(&mut self, next_expected: u32) -> Result<S, DataError> {
        if next_expected < self.next_expected {
            return Err(DataError::NonMonotonicRequest {
                previous: self.next_expected,
                requested: next_expected,
            });
        }
        self.next_expected = next_expected;
        self.next_expected_index = self
            .elements
            .iter()
            .position(|e| e.id() >= next_expected)
            .unwrap_or(self.elements.len());
        let end = self
            .elements
            .len()
            .min(self.next_expected_index.saturating_add(self.max_segment_len));
        let elements = self
            .elements
            .range(self.next_expected_index..end)
            .cloned()
            .collect();
        let total = self.elements.len();
        Ok(S::from_parts(
            next_expected,
            total as u32,
            (total - self.next_expected_index) as u32,
            elements,
        ))
    }
}

impl<S: ListSegmentShape> Default for ListSendSynchronizer<S> {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            max_segment_len: DEFAULT_MAX_SEGMENT_LEN,
            elements: VecDeque::new(),
            requests: EventQueue::new(),
            next_expected: 0,
            next_expected_index: 0,
        }
    }
}

impl<S: ListSegmentShape> Filter for ListSendSynchronizer<S> {
    type Input = ListUpdate<S::Element>;
    type Output = S;

    fn input(&mut self, event: Option<ListUpdate<S::Element>>) -> Result<(), ProtocolError> {
        let Some(event) = event else {
            return Ok(());
        };
        if let Some(element) = event.new_element {
            self.append(element);
        }
        self.requests.input(event.next_expected)
    }

    fn output(&mut self) -> Result<Option<S>, ProtocolError> {
        let Some(next_expected) = self.requests.pop() else {
            return Ok(None);
        };
        Ok(Some(self.segment(next_expected)?))
    }
}
