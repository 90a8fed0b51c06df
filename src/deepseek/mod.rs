mod client;
mod core;

pub use self::client::{ChunkStream, CompletionProvider, DeepSeekClient, decode_event_stream};
pub use self::core::*;
