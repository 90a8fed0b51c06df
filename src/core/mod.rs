pub mod config;
pub mod error;

pub use config::{AppConfig, ClientConfig};
pub use error::{ChatError, ErrorCode};
