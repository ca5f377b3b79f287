//! Network primitives.
mod socket;

pub use socket::{AsyncStream, Socket};
