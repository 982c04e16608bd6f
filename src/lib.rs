//! Append-only benchmark history, persisted as the `data.js` script a static
//! dashboard reads, with ingest that survives concurrent CI writers.

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod gobench;
pub mod render;
pub mod scan;
pub mod schema;
pub mod store;

pub use backend::{FileBackend, HistoryBackend, MemoryBackend, Version};
pub use config::StoreConfig;
pub use error::{CorruptDataError, Error, Result, StorageError};
pub use schema::{BenchmarkRun, CommitRecord, Entry, HistoryDocument, Person, Suite};
pub use store::{HistoryStore, Ingested, PendingWrite};
