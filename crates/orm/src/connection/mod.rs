//! Connection Management
//!
//! General pool threads for non-transactional work, dedicated worker threads
//! for open transactions, and the counters both report into.

pub mod pool;
pub mod statistics;
pub mod worker;

// Re-export for convenience
pub use pool::*;
pub use statistics::*;
pub use worker::*;
