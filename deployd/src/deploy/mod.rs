//! Deployment orchestration

pub mod fsm;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
