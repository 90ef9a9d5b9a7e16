//! Library surface of the kumo CLI, split out for testing.

pub mod cli;
pub mod logging;
