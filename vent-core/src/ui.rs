//! UI link: one message body per transport message, no framing layers.

use std::sync::Arc;

use log::error;

use crate::error::ProtocolError;
use crate::messages::{MessageReceiver, MessageSender, Payload, Registry};
use crate::sansio::{EventQueue, Filter};

pub struct UiReceiver<P: Payload> {
    buffer: EventQueue<Vec<u8>>,
    message_receiver: MessageReceiver<P>,
}

impl<P: Payload> UiReceiver<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            buffer: EventQueue::new(),
            message_receiver: MessageReceiver::new(registry),
        }
    }
}

impl<P: Payload> Filter for UiReceiver<P> {
    type Input = Vec<u8>;
    type Output = P;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    /// Parse buffered bodies until one yields a value; malformed ones are logged and dropped.
    fn output(&mut self) -> Result<Option<P>, ProtocolError> {
        while let Some(body) = self.buffer.pop() {
            self.message_receiver.input(Some(body.clone()))?;
            match self.message_receiver.output() {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(err) => error!("MessageReceiver: {err}: {body:02x?}"),
            }
        }
        Ok(None)
    }
}

pub struct UiSender<P: Payload> {
    message_sender: MessageSender<P>,
}

impl<P: Payload> UiSender<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            message_sender: MessageSender::new(registry),
        }
    }
}

impl<P: Payload> Filter for UiSender<P> {
    type Input = P;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<P>) -> Result<(), ProtocolError> {
        self.message_sender.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.message_sender.output() {
            Ok(body) => Ok(body),
            Err(err) => {
                error!("MessageSender: {err}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{self, Ping, RotaryEncoder, State, StateKind};

    fn registry() -> Arc<Registry<StateKind>> {
        Arc::new(schema::ui_registry())
    }

    #[test]
    fn rotary_encoder_travels_on_ui_link() {
        let mut sender = UiSender::<State>::new(registry());
        let mut receiver = UiReceiver::<State>::new(registry());
        let value = State::RotaryEncoder(RotaryEncoder {
            step: -3,
            button_pressed: true,
            last_button_down: 1.5,
            ..Default::default()
        });
        sender.input(Some(value.clone())).unwrap();
        let body = sender.output().unwrap().unwrap();
        assert_eq!(body[0], 128);
        receiver.input(Some(body)).unwrap();
        assert_eq!(receiver.output().unwrap(), Some(value));
    }

    #[test]
    fn malformed_body_is_skipped() {
        let mut sender = UiSender::<State>::new(registry());
        let mut receiver = UiReceiver::<State>::new(registry());
        receiver.input(Some(vec![77, 1, 2])).unwrap();
        receiver.input(Some(vec![])).unwrap();
        sender
            .input(Some(State::Ping(Ping { time: 4, id: 5 })))
            .unwrap();
        receiver.input(sender.output().unwrap()).unwrap();
        assert_eq!(
            receiver.output().unwrap(),
            Some(State::Ping(Ping { time: 4, id: 5 }))
        );
        assert_eq!(receiver.output().unwrap(), None);
    }
}
