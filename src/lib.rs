//! cyclewatch library
//!
//! Cycle detection and learned-baseline alerting for monitored electrical
//! loads. The daemon and demo binaries are thin drivers around [`monitor::Monitor`].

pub mod alerts;
pub mod baseline;
pub mod core;
pub mod db;
pub mod hardware;
pub mod monitor;
pub mod schedule;
pub mod sink;
