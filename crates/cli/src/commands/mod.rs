//! Command implementations

pub mod bench;
pub mod state;
