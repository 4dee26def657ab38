//! Batching of variable-size molecular graphs.
//!
//! Graphs are first padded to a common node/edge count so they fit in
//! rectangular tensors, then "unpadded" back into one contiguous node list
//! and one contiguous edge list right before message passing. Edge endpoints
//! are shifted by each graph's node offset so they index the concatenated
//! node list.

use tch::{Device, Kind, Tensor};

use super::builder::{EdgeFeatures, MolecularGraph};
use crate::error::Result;

/// Strips padding from a `(batch, max_count, ...)` tensor and concatenates the
/// valid rows of every graph along dimension 0, in graph order.
pub fn unpad_and_cat(padded: &Tensor, counts: &[i64]) -> Tensor {
    if counts.is_empty() {
        return padded.flatten(0, 1);
    }
    let parts: Vec<Tensor> = counts
        .iter()
        .enumerate()
        .map(|(i, &n)| padded.get(i as i64).narrow(0, 0, n))
        .collect();
    Tensor::cat(&parts, 0)
}

/// Exclusive prefix sum of node counts.
fn exclusive_prefix_sum(counts: &[i64]) -> Vec<i64> {
    counts
        .iter()
        .scan(0i64, |acc, &n| {
            let offset = *acc;
            *acc += n;
            Some(offset)
        })
        .collect()
}

/// A batch of concatenated graphs ready for message passing.
#[derive(Debug)]
pub struct ConcatenatedGraph {
    /// `(num_nodes,)` atomic numbers.
    pub atomic_numbers: Tensor,
    /// `(num_edges, 2)` global `[source, target]` indices.
    pub edges: Tensor,
    /// `(num_edges, 1)` distances.
    pub distances: Tensor,
    /// `(num_edges, 3)` source-to-target vectors.
    pub displacements: Tensor,
}

impl ConcatenatedGraph {
    pub fn num_nodes(&self) -> i64 {
        self.atomic_numbers.size()[0]
    }

    pub fn num_edges(&self) -> i64 {
        self.edges.size()[0]
    }
}

/// Padded tensor form of several molecular graphs.
#[derive(Debug)]
pub struct GraphBatch {
    /// `(batch, max_nodes)` atomic numbers, zero-padded.
    pub nodes: Tensor,
    /// `(batch, max_edges, 2)` molecule-local edge endpoints, zero-padded.
    pub edges: Tensor,
    /// `(batch, max_edges, 1)` edge distances.
    pub edges_features: Tensor,
    /// `(batch, max_edges, 3)` edge displacement vectors.
    pub edges_displacement: Tensor,
    num_nodes: Vec<i64>,
    num_edges: Vec<i64>,
}

impl GraphBatch {
    pub fn len(&self) -> usize {
        self.num_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_nodes.is_empty()
    }

    /// True node count of every graph.
    pub fn num_nodes(&self) -> &[i64] {
        &self.num_nodes
    }

    /// True edge count of every graph.
    pub fn num_edges(&self) -> &[i64] {
        &self.num_edges
    }

    pub fn total_nodes(&self) -> i64 {
        self.num_nodes.iter().sum()
    }

    pub fn total_edges(&self) -> i64 {
        self.num_edges.iter().sum()
    }

    /// Global index of each graph's first node: `offset[i] = sum(num_nodes[..i])`.
    pub fn edge_offset(&self) -> Vec<i64> {
        exclusive_prefix_sum(&self.num_nodes)
    }

    /// Unpads everything and translates edges to global node indices.
    pub fn concatenate(&self) -> ConcatenatedGraph {
        let device = self.nodes.device();
        let offset = Tensor::from_slice(&self.edge_offset())
            .to_device(device)
            .view([-1, 1, 1]);
        let global_edges = &self.edges + &offset;

        ConcatenatedGraph {
            atomic_numbers: unpad_and_cat(&self.nodes, &self.num_nodes),
            edges: unpad_and_cat(&global_edges, &self.num_edges),
            distances: unpad_and_cat(&self.edges_features, &self.num_edges),
            displacements: unpad_and_cat(&self.edges_displacement, &self.num_edges),
        }
    }

    /// Recovers the individual graphs, with molecule-local edge indices.
    pub fn unbatch(&self) -> Result<Vec<MolecularGraph>> {
        let host = |t: &Tensor| t.to_device(Device::Cpu).reshape([-1]);
        let nodes = Vec::<i64>::try_from(&host(&self.nodes))?;
        let edges = Vec::<i64>::try_from(&host(&self.edges))?;
        let distances = Vec::<f32>::try_from(&host(&self.edges_features))?;
        let displacements = Vec::<f32>::try_from(&host(&self.edges_displacement))?;

        let max_nodes = self.nodes.size()[1] as usize;
        let max_edges = self.edges.size()[1] as usize;

        let graphs = (0..self.len())
            .map(|i| {
                let n = self.num_nodes[i] as usize;
                let m = self.num_edges[i] as usize;
                let node_base = i * max_nodes;
                let edge_base = i * max_edges;

                let atomic_numbers = &nodes[node_base..node_base + n];
                let local_edges: Vec<[i64; 2]> = (edge_base..edge_base + m)
                    .map(|e| [edges[2 * e], edges[2 * e + 1]])
                    .collect();
                let features: Vec<EdgeFeatures> = (edge_base..edge_base + m)
                    .map(|e| EdgeFeatures {
                        distance: distances[e],
                        displacement: [
                            displacements[3 * e],
                            displacements[3 * e + 1],
                            displacements[3 * e + 2],
                        ],
                    })
                    .collect();
                MolecularGraph::from_parts(atomic_numbers, &local_edges, &features)
            })
            .collect();
        Ok(graphs)
    }
}

/// Collates molecular graphs into padded tensors on a target device.
#[derive(Debug, Clone, Copy)]
pub struct GraphBatcher {
    device: Device,
}

impl GraphBatcher {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Pads every graph to the largest node and edge count in `graphs`.
    ///
    /// Empty graphs are kept and contribute zero nodes and zero edges.
    pub fn collate(&self, graphs: &[MolecularGraph]) -> GraphBatch {
        let batch = graphs.len();
        let max_nodes = graphs.iter().map(|g| g.num_nodes()).max().unwrap_or(0);
        let max_edges = graphs.iter().map(|g| g.num_edges()).max().unwrap_or(0);

        let mut nodes = vec![0i64; batch * max_nodes];
        let mut edges = vec![0i64; batch * max_edges * 2];
        let mut distances = vec![0f32; batch * max_edges];
        let mut displacements = vec![0f32; batch * max_edges * 3];

        for (i, graph) in graphs.iter().enumerate() {
            for (k, z) in graph.atomic_numbers().into_iter().enumerate() {
                nodes[i * max_nodes + k] = z;
            }
            let base = i * max_edges;
            for (k, [src, dst]) in graph.edges().into_iter().enumerate() {
                edges[2 * (base + k)] = src;
                edges[2 * (base + k) + 1] = dst;
            }
            for (k, d) in graph.distances().into_iter().enumerate() {
                distances[base + k] = d;
            }
            for (k, v) in graph.displacements().into_iter().enumerate() {
                displacements[3 * (base + k)..3 * (base + k) + 3].copy_from_slice(&v);
            }
        }

        let (b, n, m) = (batch as i64, max_nodes as i64, max_edges as i64);
        GraphBatch {
            nodes: Tensor::from_slice(&nodes)
                .reshape([b, n])
                .to_device(self.device),
            edges: Tensor::from_slice(&edges)
                .reshape([b, m, 2])
                .to_device(self.device),
            edges_features: Tensor::from_slice(&distances)
                .reshape([b, m, 1])
                .to_device(self.device),
            edges_displacement: Tensor::from_slice(&displacements)
                .reshape([b, m, 3])
                .to_device(self.device),
            num_nodes: graphs.iter().map(|g| g.num_nodes() as i64).collect(),
            num_edges: graphs.iter().map(|g| g.num_edges() as i64).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::spaces::Atom;

    fn chain(n: usize, spacing: f64) -> Vec<Atom> {
        (0..n)
            .map(|i| Atom::new(6, [i as f64 * spacing, 0.0, 0.0]))
            .collect()
    }

    fn graphs() -> Vec<MolecularGraph> {
        let builder = GraphBuilder::new(1.6);
        vec![
            builder.build(&chain(3, 1.5)),
            builder.build(&[]),
            builder.build(&chain(2, 1.1)),
        ]
    }

    #[test]
    fn edge_offset_skips_empty_graphs() {
        let batch = GraphBatcher::new(Device::Cpu).collate(&graphs());
        assert_eq!(batch.num_nodes(), &[3, 0, 2]);
        assert_eq!(batch.edge_offset(), vec![0, 3, 3]);
    }

    #[test]
    fn padded_shapes_use_maximum_counts() {
        let batch = GraphBatcher::new(Device::Cpu).collate(&graphs());
        assert_eq!(batch.nodes.size(), vec![3, 3]);
        assert_eq!(batch.edges.size(), vec![3, 4, 2]);
        assert_eq!(batch.edges_features.size(), vec![3, 4, 1]);
        assert_eq!(batch.num_edges(), &[4, 0, 2]);
    }

    #[test]
    fn concatenate_shifts_edges_into_global_indices() {
        let batch = GraphBatcher::new(Device::Cpu).collate(&graphs());
        let flat = batch.concatenate();
        assert_eq!(flat.num_nodes(), 5);
        assert_eq!(flat.num_edges(), 6);

        let edges = Vec::<i64>::try_from(&flat.edges.reshape([-1])).unwrap();
        // 3-chain: 0-1, 1-0, 1-2, 2-1; 2-chain shifted by 3.
        assert_eq!(edges, vec![0, 1, 1, 0, 1, 2, 2, 1, 3, 4, 4, 3]);
        assert!(edges[8..].iter().all(|&e| (3..5).contains(&e)));
    }

    #[test]
    fn unbatch_recovers_every_graph() {
        let originals = graphs();
        let batch = GraphBatcher::new(Device::Cpu).collate(&originals);
        let recovered = batch.unbatch().unwrap();
        assert_eq!(recovered.len(), originals.len());
        for (orig, back) in originals.iter().zip(&recovered) {
            assert_eq!(orig.num_nodes(), back.num_nodes());
            assert_eq!(orig.num_edges(), back.num_edges());
            assert_eq!(orig.atomic_numbers(), back.atomic_numbers());
            assert_eq!(orig.edges(), back.edges());
            assert_eq!(orig.distances(), back.distances());
            assert_eq!(orig.displacements(), back.displacements());
        }
    }

    #[test]
    fn unpad_and_cat_inverts_padding() {
        let padded = Tensor::from_slice(&[1i64, 2, 0, 3, 0, 0, 4, 5, 6]).reshape([3, 3]);
        let flat = unpad_and_cat(&padded, &[2, 1, 3]);
        assert_eq!(Vec::<i64>::try_from(&flat).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_batch_concatenates_to_nothing() {
        let batch = GraphBatcher::new(Device::Cpu).collate(&[]);
        assert!(batch.is_empty());
        let flat = batch.concatenate();
        assert_eq!(flat.num_nodes(), 0);
        assert_eq!(flat.num_edges(), 0);
        assert_eq!(flat.edges.size(), vec![0, 2]);
    }

    #[test]
    fn all_empty_graphs() {
        let builder = GraphBuilder::new(5.0);
        let batch = GraphBatcher::new(Device::Cpu).collate(&[builder.build(&[]), builder.build(&[])]);
        assert_eq!(batch.edge_offset(), vec![0, 0]);
        assert_eq!(batch.concatenate().num_nodes(), 0);
    }
}
