//! Descriptor index over protobuf schema definitions.
//!
//! Loads either a precomputed index (fast path, nothing scanned) or raw
//! `FileDescriptorProto` / `FileDescriptorSet` bytes (builder path), answers
//! name and namespace queries from compact tables, and resolves full
//! descriptors lazily through an external [`ReflectivePool`].

pub mod arena;
pub mod builder;
pub mod database;
pub mod error;
pub mod index;
pub mod name;
pub mod pool;
pub mod scanner;
pub mod source;
pub mod types;
pub mod wire;

pub use builder::IndexBuilder;
pub use database::{DatabaseConfig, DescriptorDatabase};
pub use error::IndexError;
pub use index::Index;
pub use pool::{DescriptorHandle, ReflectivePool, SchemaSource};
pub use types::{NamespaceEntry, PackageEntry, PackageId, SymbolId, SymbolKind};
