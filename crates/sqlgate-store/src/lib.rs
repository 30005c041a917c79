//! Metadata store for the sqlgate gateway.
//!
//! The gateway reads four collections: servers, tools, resources and MCP
//! tokens (plus per-server auth settings). [`MetadataStore`] is the contract;
//! [`SqliteMetadataStore`] persists to a single file and [`MemoryStore`]
//! keeps everything in process.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteMetadataStore;
pub use store::{MetadataStore, StoreStats};
