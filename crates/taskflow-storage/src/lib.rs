//! TaskFlow Storage - Document storage for the TaskFlow services
//!
//! Persistence is a collaborator of the services, so it sits behind the
//! traits in [`traits`]. Currently supports:
//! - In-memory storage (default, for development/testing)

pub mod traits;

#[cfg(feature = "memory")]
pub mod memory;

// Re-exports
pub use traits::{TaskStore, UserStore};

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
