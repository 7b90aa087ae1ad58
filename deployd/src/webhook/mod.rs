//! Inbound webhook handling

pub mod normalize;
pub mod signature;
