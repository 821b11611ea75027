pub mod local;
pub mod qdrant;

pub use local::{FsBlobStore, JsonMetadataStore};
pub use qdrant::QdrantIndex;
