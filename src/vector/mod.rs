//! Columnar vector store: dense Float32 rows tied to node ids, organized as
//! fragments of row groups with a deletion bitmap. Similarity indexes are
//! out of scope; this module owns only the storage layout and its `VEC1`
//! serialization.

pub mod serialize;
pub mod store;
pub mod types;

pub use store::{
  vector_store_delete, vector_store_get, vector_store_insert, VectorStore,
};
pub use types::{DistanceMetric, VectorStoreConfig};
