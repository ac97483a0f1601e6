//! Comms subsystem: external I/O channels. Only the axum HTTP channel exists today.

pub mod axum_channel;

pub use axum_channel::{AxumState, build_router};
