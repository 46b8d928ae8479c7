//! Rotary encoder samples to `RotaryEncoder` state.

use std::time::Duration;

use crate::error::ProtocolError;
use crate::sansio::{EventQueue, Filter};
use crate::schema::RotaryEncoder;

/// One reading of the knob: its step count and whether the button is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotarySample {
    pub time: Duration,
    pub step: i32,
    pub button_pressed: bool,
}

/// Tracks when the step and the button last changed.
#[derive(Debug, Clone, Default)]
pub struct RotaryEncoderReceiver {
    buffer: EventQueue<RotarySample>,
    last_step: i32,
    last_step_change: f64,
    button_pressed: bool,
    last_button_down: f64,
    last_button_up: f64,
}

impl RotaryEncoderReceiver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for RotaryEncoderReceiver {
    type Input = RotarySample;
    type Output = RotaryEncoder;

    fn input(&mut self, event: Option<RotarySample>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<RotaryEncoder>, ProtocolError> {
        let Some(sample) = self.buffer.pop() else {
            return Ok(None);
        };
        let now = sample.time.as_secs_f64();
        if sample.step != self.last_step {
            self.last_step = sample.step;
            self.last_step_change = now;
        }
        if sample.button_pressed != self.button_pressed {
            if sample.button_pressed {
                self.last_button_down = now;
            } else {
                self.last_button_up = now;
            }
            self.button_pressed = sample.button_pressed;
        }
        Ok(Some(RotaryEncoder {
            step: self.last_step,
            last_step_change: self.last_step_change,
            button_pressed: self.button_pressed,
            last_button_down: self.last_button_down,
            last_button_up: self.last_button_up,
        }))
    }
}
