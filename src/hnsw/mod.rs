//! HNSW graph implementation.
//!
//! A hierarchical navigable small world graph over labels, with logical
//! deletion via tombstones. The graph never owns vector data; it reads
//! embeddings through [`VectorProvider`].

mod graph;
mod insert;
mod params;
mod search;

pub use graph::{GraphError, HnswGraph, Label, VectorProvider};
pub use params::{DistanceKind, HnswParams};
