//! Client side of the streaming relay: reads the event stream, builds up
//! the reply text and supports cancelling a reply mid-stream.

mod client;
mod event;

pub use client::{Completion, ConsumerError, StreamConsumer};
pub use event::{ParseFailure, StreamEvent, parse_line};
