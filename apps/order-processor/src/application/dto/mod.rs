//! Data Transfer Objects

mod event_message;

pub use event_message::{ENVELOPE_VERSION, EventMessage};
