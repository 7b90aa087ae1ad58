//! Wire models for the deployd HTTP surface.

pub mod models;
