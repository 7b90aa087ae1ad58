//! Wire models for the external APIs deployd talks to.

pub mod models;
