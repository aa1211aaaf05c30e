//! Durable persistence for engine datasets.

pub mod dataset;
pub mod file;
pub mod mirror;

pub use dataset::{Dataset, Decoded, OwnerMap, Record};
pub use file::FileStore;
pub use mirror::Mirror;
