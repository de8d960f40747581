//! Allocation Registry
//!
//! The durable keeper of export-slot state. The [`AllocationRegistry`] port
//! is defined in `domain::ports`; fleet deployments point drivers at a
//! registry backed by shared storage, while standalone mode and tests use
//! the in-process [`MemoryRegistry`].

pub mod memory;

pub use memory::MemoryRegistry;
