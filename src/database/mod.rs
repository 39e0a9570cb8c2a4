// Database module
// Per-department similarity indexes stored in LanceDB

pub mod lancedb;

pub use lancedb::{ChunkRecord, DepartmentIndex, IndexStore, SearchHit};
