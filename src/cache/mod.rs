//! Versioned key→response stores with memory and disk backends.

pub mod backend;
pub mod disk;
pub mod health;
pub mod policy;
pub mod storage;

pub use backend::{MemoryBackend, StoreBackend, StoreEntries};
pub use disk::DiskBackend;
pub use health::StoreHealth;
pub use policy::CachePolicy;
pub use storage::{
    CacheStorage, MatchOptions, PopulationFailure, PopulationReport, Store, StoreSummary,
};
