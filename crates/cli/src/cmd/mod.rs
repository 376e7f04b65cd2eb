//! CLI command implementations

pub mod branches;
pub mod config;
pub mod disconnect;
pub mod status;
pub mod watch;
