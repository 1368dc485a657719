pub mod transport;
pub mod wire;

pub use transport::{
    locate_assistant_binary, NextMessage, Transport, TransportError, INBOUND_QUEUE_CAPACITY,
};
pub use wire::{classify, ApprovalCategory, Event};
