//! Feedback Coordinator Library
//!
//! Fuses health, performance and market feedback into one coordinated trading
//! action per cycle, with an independent emergency watchdog on top.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod emergency;
pub mod error;
pub mod feedback;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::MasterCoordinator;
pub use error::{Error, Result};
