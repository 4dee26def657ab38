//! Cutoff neighbour graphs over atoms and their batched tensor form.

pub mod batch;
pub mod builder;

pub use batch::{unpad_and_cat, GraphBatch, GraphBatcher};
pub use builder::{EdgeFeatures, GraphBuilder, MolecularGraph};
