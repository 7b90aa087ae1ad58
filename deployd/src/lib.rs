//! deployd library
//!
//! Receives push webhooks, drives a deployment platform through trigger,
//! monitoring and rollback, and reports each outcome once.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod server;
pub mod storage;
pub mod utils;
pub mod webhook;
pub mod workers;
