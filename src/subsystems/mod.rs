//! Subsystem modules for the chat gateway.

pub mod auth;
pub mod comms;
pub mod gateway;
pub mod sessions;
