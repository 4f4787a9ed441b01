//! Koli operator - wires the platform controllers into one process

pub mod config;
pub mod controller_runner;
pub mod startup;
