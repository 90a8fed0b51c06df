pub mod api;
pub mod cli;
pub mod consumer;
pub mod core;
pub mod deepseek;
pub mod sessions;
pub mod sse;
