//! Network capture: event source capability, process-wide listener, channel

mod channel;
mod listener;
mod source;

pub use channel::NetworkChannel;
pub use listener::{CapturedResponse, HttpListener, RecordingClient};
pub use source::{NetworkEventSource, Subscription};
