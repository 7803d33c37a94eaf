//! # Polydex Storage
//!
//! Persistent index storage on LMDB and the manager of named indexes.

pub mod lmdb_storage;
pub mod manager;

pub use lmdb_storage::LmdbBackend;
pub use manager::StorageManager;
