//! Single-molecule neighbour graph construction.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::spaces::Atom;

/// Per-edge geometric features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeFeatures {
    /// Inter-atomic distance.
    pub distance: f32,
    /// Vector from the source atom to the target atom.
    pub displacement: [f32; 3],
}

/// Directed neighbour graph of one molecule.
///
/// Nodes carry atomic numbers in atom order. Every ordered pair of distinct
/// atoms within the cutoff has an edge, enumerated source-major.
#[derive(Debug, Clone, Default)]
pub struct MolecularGraph {
    graph: DiGraph<i64, EdgeFeatures>,
}

impl MolecularGraph {
    /// Assembles a graph from node labels and local edges.
    pub fn from_parts(
        atomic_numbers: &[i64],
        edges: &[[i64; 2]],
        features: &[EdgeFeatures],
    ) -> Self {
        debug_assert_eq!(edges.len(), features.len());
        let mut graph = DiGraph::with_capacity(atomic_numbers.len(), edges.len());
        for &z in atomic_numbers {
            graph.add_node(z);
        }
        for (&[src, dst], &feat) in edges.iter().zip(features) {
            graph.add_edge(NodeIndex::new(src as usize), NodeIndex::new(dst as usize), feat);
        }
        Self { graph }
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Atomic numbers in node order.
    pub fn atomic_numbers(&self) -> Vec<i64> {
        self.graph.node_weights().copied().collect()
    }

    /// `[source, target]` pairs with molecule-local indices, in enumeration order.
    pub fn edges(&self) -> Vec<[i64; 2]> {
        self.graph
            .edge_references()
            .map(|e| [e.source().index() as i64, e.target().index() as i64])
            .collect()
    }

    /// Edge distances in enumeration order.
    pub fn distances(&self) -> Vec<f32> {
        self.graph.edge_weights().map(|e| e.distance).collect()
    }

    /// Edge displacement vectors in enumeration order.
    pub fn displacements(&self) -> Vec<[f32; 3]> {
        self.graph.edge_weights().map(|e| e.displacement).collect()
    }

    /// Number of neighbours within the cutoff of the given atom.
    pub fn degree(&self, atom: usize) -> usize {
        self.graph.neighbors(NodeIndex::new(atom)).count()
    }

    /// Underlying petgraph graph.
    pub fn inner(&self) -> &DiGraph<i64, EdgeFeatures> {
        &self.graph
    }
}

/// Builds fixed-cutoff neighbour graphs from atom lists.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    cutoff: f64,
}

impl GraphBuilder {
    pub fn new(cutoff: f64) -> Self {
        Self { cutoff }
    }

    /// Connects every ordered pair of distinct atoms whose distance is at most
    /// the cutoff. An empty atom list gives an empty graph.
    pub fn build(&self, atoms: &[Atom]) -> MolecularGraph {
        let mut graph = DiGraph::with_capacity(atoms.len(), atoms.len() * atoms.len());
        let nodes: Vec<NodeIndex> = atoms
            .iter()
            .map(|atom| graph.add_node(i64::from(atom.atomic_number)))
            .collect();

        for (i, src) in atoms.iter().enumerate() {
            for (j, dst) in atoms.iter().enumerate() {
                if i == j {
                    continue;
                }
                let distance = src.distance_to(dst);
                if distance <= self.cutoff {
                    let [dx, dy, dz] = src.displacement_to(dst);
                    graph.add_edge(
                        nodes[i],
                        nodes[j],
                        EdgeFeatures {
                            distance: distance as f32,
                            displacement: [dx as f32, dy as f32, dz as f32],
                        },
                    );
                }
            }
        }

        MolecularGraph { graph }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Vec<Atom> {
        vec![
            Atom::new(8, [0.0, 0.0, 0.0]),
            Atom::new(1, [0.96, 0.0, 0.0]),
            Atom::new(1, [-0.24, 0.93, 0.0]),
        ]
    }

    #[test]
    fn empty_atoms_give_empty_graph() {
        let graph = GraphBuilder::new(5.0).build(&[]);
        assert_eq!(graph.num_nodes(), 0);
        assert_eq!(graph.num_edges(), 0);
    }

    #[test]
    fn single_atom_has_no_edges() {
        let graph = GraphBuilder::new(5.0).build(&[Atom::new(6, [1.0, 2.0, 3.0])]);
        assert_eq!(graph.num_nodes(), 1);
        assert_eq!(graph.num_edges(), 0);
        assert_eq!(graph.atomic_numbers(), vec![6]);
    }

    #[test]
    fn all_pairs_within_cutoff_are_connected_both_ways() {
        let graph = GraphBuilder::new(5.0).build(&water());
        assert_eq!(graph.num_edges(), 6);
        assert_eq!(
            graph.edges(),
            vec![[0, 1], [0, 2], [1, 0], [1, 2], [2, 0], [2, 1]]
        );
        let d = graph.distances();
        assert!((d[0] - 0.96).abs() < 1e-6);
        assert_eq!(d[0], d[2]);
        assert_eq!(graph.degree(0), 2);
    }

    #[test]
    fn cutoff_excludes_distant_pairs() {
        let atoms = vec![
            Atom::new(6, [0.0, 0.0, 0.0]),
            Atom::new(6, [1.0, 0.0, 0.0]),
            Atom::new(6, [10.0, 0.0, 0.0]),
        ];
        let graph = GraphBuilder::new(2.0).build(&atoms);
        assert_eq!(graph.edges(), vec![[0, 1], [1, 0]]);
        assert_eq!(graph.degree(2), 0);
    }

    #[test]
    fn pair_exactly_at_cutoff_is_connected() {
        let atoms = vec![Atom::new(1, [0.0, 0.0, 0.0]), Atom::new(1, [2.0, 0.0, 0.0])];
        assert_eq!(GraphBuilder::new(2.0).build(&atoms).num_edges(), 2);
    }

    #[test]
    fn displacement_points_from_source_to_target() {
        let atoms = vec![Atom::new(1, [0.0, 0.0, 0.0]), Atom::new(1, [0.0, 1.5, 0.0])];
        let graph = GraphBuilder::new(5.0).build(&atoms);
        assert_eq!(graph.displacements()[0], [0.0, 1.5, 0.0]);
        assert_eq!(graph.displacements()[1], [0.0, -1.5, 0.0]);
    }

    #[test]
    fn enumeration_is_reproducible() {
        let builder = GraphBuilder::new(5.0);
        let a = builder.build(&water());
        let b = builder.build(&water());
        assert_eq!(a.edges(), b.edges());
        assert_eq!(a.distances(), b.distances());
    }

    #[test]
    fn from_parts_round_trips() {
        let graph = GraphBuilder::new(5.0).build(&water());
        let features: Vec<EdgeFeatures> = graph.inner().edge_weights().copied().collect();
        let rebuilt =
            MolecularGraph::from_parts(&graph.atomic_numbers(), &graph.edges(), &features);
        assert_eq!(rebuilt.edges(), graph.edges());
        assert_eq!(rebuilt.distances(), graph.distances());
    }
}
