//! Notifications

pub mod dispatcher;
