//! Outbound HTTP clients

pub mod client;
pub mod messaging;
pub mod platform;
pub mod voice;
