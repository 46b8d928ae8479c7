//! Pull-based filter interface and the bounded buffers filters are built on.
//! Nothing here performs I/O; the host pumps `input`/`output`.

use std::collections::VecDeque;

use crate::error::{CapacityError, ProtocolError};

/// A buffered transformation. `input` stores an event (or ignores `None`);
/// `output` emits at most one transformed item per call.
pub trait Filter {
    type Input;
    type Output;

    /// Buffer an input event. Fails only when a bounded buffer is full,
    /// except where a filter documents a validation check at input.
    fn input(&mut self, event: Option<Self::Input>) -> Result<(), ProtocolError>;

    /// Emit the next output, or `Ok(None)` if nothing is ready.
    fn output(&mut self) -> Result<Option<Self::Output>, ProtocolError>;

    /// Iterate `output()` until it returns `Ok(None)`. An error is yielded once and ends the iteration.
    fn output_all(&mut self) -> OutputAll<'_, Self>
    where
        Self: Sized,
    {
        OutputAll {
            filter: self,
            done: false,
        }
    }
}

/// Iterator returned by [`Filter::output_all`].
pub struct OutputAll<'a, F: Filter> {
    filter: &'a mut F,
    done: bool,
}

impl<F: Filter> Iterator for OutputAll<'_, F> {
    type Item = Result<F::Output, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.filter.output().transpose();
        self.done = !matches!(next, Some(Ok(_)));
        next
    }
}

/// FIFO queue of discrete items with an optional capacity limit.
#[derive(Debug, Clone)]
pub struct EventQueue<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> EventQueue<T> {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            capacity: None,
        }
    }

    /// Queue that rejects inputs once it holds `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn push(&mut self, item: T) -> Result<(), CapacityError> {
        if let Some(capacity) = self.capacity {
            if self.items.len() >= capacity {
                return Err(CapacityError {
                    capacity,
                    len: self.items.len(),
                    rejected: 1,
                });
            }
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Filter for EventQueue<T> {
    type Input = T;
    type Output = T;

    fn input(&mut self, event: Option<T>) -> Result<(), ProtocolError> {
        if let Some(item) = event {
            self.push(item)?;
        }
        Ok(())
    }

    fn output(&mut self) -> Result<Option<T>, ProtocolError> {
        Ok(self.pop())
    }
}

/// Byte FIFO with an optional capacity limit. A chunk that would overflow is
/// rejected whole; nothing from it is stored.
#[derive(Debug, Clone, Default)]
pub struct ByteStream {
    bytes: VecDeque<u8>,
    capacity: Option<usize>,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), CapacityError> {
        if let Some(capacity) = self.capacity {
            if self.bytes.len() + chunk.len() > capacity {
                return Err(CapacityError {
                    capacity,
                    len: self.bytes.len(),
                    rejected: chunk.len(),
                });
            }
        }
        self.bytes.extend(chunk.iter().copied());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }

    /// Remove and return everything buffered.
    pub fn drain_all(&mut self) -> Vec<u8> {
        self.bytes.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Filter for ByteStream {
    type Input = Vec<u8>;
    type Output = u8;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        if let Some(chunk) = event {
            self.extend(&chunk)?;
        }
        Ok(())
    }

    fn output(&mut self) -> Result<Option<u8>, ProtocolError> {
        Ok(self.pop())
    }
}
