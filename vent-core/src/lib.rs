//! Ventilator backend protocol stack.
//! Host-driven: no I/O; the host feeds bytes, values and clock ticks into
//! filters and writes out whatever they produce.

pub mod error;
pub mod sansio;

pub mod crc;
pub mod datagrams;
pub mod frames;
pub mod messages;

pub mod lists;
pub mod schema;
pub mod states;

pub mod device;
pub mod file;
pub mod rotary;
pub mod ui;

pub mod aggregator;
pub mod config;
pub mod server;

pub use aggregator::{Aggregator, BackendSender, OutputEvent, ReceiveEvent, SendEvent};
pub use config::SyncConfig;
pub use error::{CapacityError, ConstructionError, DataError, ProtocolError};
pub use sansio::Filter;
pub use schema::{State, StateKind};
pub use server::{
    FrontendConnectionEvent, ServerReceiveEvent, ServerReceiveOutput, ServerReceiver,
    ServerSendOutput, ServerSender,
};
