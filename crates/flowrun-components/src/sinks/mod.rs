//! Sink components — accumulating or finalizing consumers.

pub mod collector;
pub mod csv_writer;
pub mod json_writer;
