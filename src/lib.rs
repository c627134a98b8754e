//! Predictive memory-pressure management
//!
//! Re-exports the control surface; see [`MemoryManager`] for the entry point.

pub use memory_api::*;
