//! Background workers

pub mod pruner;
