//! chatgate: an HTTP/SSE chat gateway over pluggable completion providers.
//!
//! The binary in `main.rs` wires these pieces together; integration tests
//! drive [`subsystems::comms::build_router`] directly.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod subsystems;
