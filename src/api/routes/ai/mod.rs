pub mod public;
pub mod relay;
mod router;

pub use router::router;
