//! Persistence seams used by the convergence controller.

pub mod memory;
pub mod traits;

pub use memory::{MemoryResourceLock, MemoryResourceRepository, MemoryStatusRepository};
pub use traits::{ResourceLock, ResourceRepository, StatusRepository};
