pub mod client;
pub mod object_store;
pub mod schema;
pub mod traits;
pub mod vector_index;

pub use client::LibsqlStore;
pub use object_store::{LocalObjectStore, ObjectStore};
pub use traits::MetadataStore;
#[cfg(test)]
pub use traits::MockMetadataStore;
pub use vector_index::EmbeddingIndex;
