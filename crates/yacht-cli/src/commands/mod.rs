//! CLI command implementations for the Yacht agent.

pub mod check;
pub mod explain;
pub mod serve;
