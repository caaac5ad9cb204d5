//! Command-line surface of the coordinator binary

pub mod commands;
