//! Persistence layer: store traits plus the in-memory and libSQL backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod retrieval;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{ContextStore, PersistenceSink, RetrievalStore, TranscriptStore};
