//! Persistent state

pub mod counter;
pub mod layout;
pub mod records;
pub mod settings;
