//! Command implementations behind the `fdstool` binary.

pub mod batch;
pub mod progress;
pub mod report;
