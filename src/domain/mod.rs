//! Domain layer - Core volume types and port definitions
//!
//! This module defines the volume record, the export-slot identifiers and
//! the core traits (ports) that protocol drivers and the allocation
//! registry implement.

pub mod ports;

pub use ports::*;
