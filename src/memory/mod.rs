//! The memory engine: types, storage, decay, the service read/write paths and
//! consolidation.

pub mod activation;
pub mod consolidation;
pub mod decay;
pub mod episodic;
pub mod in_memory;
pub mod outcome;
pub mod repository;
pub mod search;
pub mod service;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use consolidation::{ConsolidationReport, ConsolidationService};
pub use outcome::{AuxOutcome, SearchOutcome, StoreAction, StoreOutcome};
pub use repository::MemoryRepository;
pub use search::SearchOptions;
pub use service::MemoryService;
