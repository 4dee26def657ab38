//! Message-passing encoder producing one embedding per atom.
//!
//! Atomic numbers are embedded, edge distances are expanded in a Gaussian
//! basis, and a stack of interaction blocks refines the node states. Each
//! block optionally updates the edge states first, then aggregates neighbour
//! messages into a scalar channel, and finally runs an equivariant update
//! that couples the scalar channel with a per-atom vector channel.

use tch::{nn, nn::Module, Kind, Tensor};

use super::ops::{gaussian_basis_size, gaussian_expansion, scatter_sum, shifted_softplus};
use crate::graph::batch::ConcatenatedGraph;

/// Atomic numbers 0..=118.
pub const NUM_EMBEDDINGS: i64 = 119;

/// Spacing (and width) of the Gaussian distance basis.
pub const GAUSSIAN_EXPANSION_STEP: f64 = 0.1;

const NORM_EPS: f64 = 1e-8;

fn sources_and_targets(edges: &Tensor) -> (Tensor, Tensor) {
    (edges.select(1, 0), edges.select(1, 1))
}

/// Edge-state update applied at the start of every interaction block.
pub enum EdgeUpdater {
    /// Edge states pass through unchanged.
    Identity,
    /// Edge states are recomputed from both endpoint node states.
    Learned { hidden: nn::Linear, out: nn::Linear },
}

impl EdgeUpdater {
    pub fn learned(p: &nn::Path, edge_size: i64, node_size: i64) -> Self {
        EdgeUpdater::Learned {
            hidden: nn::linear(
                p / "hidden",
                2 * node_size + edge_size,
                2 * edge_size,
                Default::default(),
            ),
            out: nn::linear(p / "out", 2 * edge_size, edge_size, Default::default()),
        }
    }

    pub fn forward(&self, edge_state: &Tensor, edges: &Tensor, nodes: &Tensor) -> Tensor {
        match self {
            EdgeUpdater::Identity => edge_state.shallow_clone(),
            EdgeUpdater::Learned { hidden, out } => {
                let (src, dst) = sources_and_targets(edges);
                let combined = Tensor::cat(
                    &[
                        nodes.index_select(0, &src),
                        nodes.index_select(0, &dst),
                        edge_state.shallow_clone(),
                    ],
                    1,
                );
                out.forward(&shifted_softplus(&hidden.forward(&combined)))
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, EdgeUpdater::Identity)
    }
}

/// Continuous-filter convolution over the neighbour graph.
struct Interaction {
    filter: nn::Linear,
    transition_in: nn::Linear,
    transition_out: nn::Linear,
}

impl Interaction {
    fn new(p: &nn::Path, node_size: i64, edge_size: i64) -> Self {
        Self {
            filter: nn::linear(p / "filter", edge_size, node_size, Default::default()),
            transition_in: nn::linear(p / "transition_in", node_size, node_size, Default::default()),
            transition_out: nn::linear(p / "transition_out", node_size, node_size, Default::default()),
        }
    }

    fn forward(&self, nodes: &Tensor, edges: &Tensor, edge_state: &Tensor) -> Tensor {
        let (src, dst) = sources_and_targets(edges);
        let gates = self.filter.forward(edge_state);
        let messages = nodes.index_select(0, &src) * gates;
        let summed = scatter_sum(&messages, &dst, nodes.size()[0]);
        let transition = self
            .transition_out
            .forward(&shifted_softplus(&self.transition_in.forward(&summed)));
        nodes + transition
    }
}

/// Couples the scalar channel `(n, h)` with a vector channel `(n, 3, h)`.
struct ScalarVectorUpdate {
    vector_filter: nn::Linear,
    vector_source: nn::Linear,
    u: nn::Linear,
    v: nn::Linear,
    mix_in: nn::Linear,
    mix_out: nn::Linear,
    node_size: i64,
}

impl ScalarVectorUpdate {
    fn new(p: &nn::Path, node_size: i64, edge_size: i64) -> Self {
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };
        Self {
            vector_filter: nn::linear(p / "vector_filter", edge_size, node_size, Default::default()),
            vector_source: nn::linear(p / "vector_source", node_size, node_size, Default::default()),
            u: nn::linear(p / "u", node_size, node_size, no_bias),
            v: nn::linear(p / "v", node_size, node_size, no_bias),
            mix_in: nn::linear(p / "mix_in", 2 * node_size, node_size, Default::default()),
            mix_out: nn::linear(p / "mix_out", node_size, 3 * node_size, Default::default()),
            node_size,
        }
    }

    fn forward(
        &self,
        scalar: &Tensor,
        vector: &Tensor,
        edges: &Tensor,
        edge_state: &Tensor,
        directions: &Tensor,
    ) -> (Tensor, Tensor) {
        let (src, dst) = sources_and_targets(edges);

        // Direction-weighted neighbour messages into the vector channel.
        let gate = self.vector_filter.forward(edge_state)
            * self.vector_source.forward(&scalar.index_select(0, &src));
        let messages = directions.unsqueeze(-1) * gate.unsqueeze(1);
        let vector = vector + scatter_sum(&messages, &dst, scalar.size()[0]);

        let uv = self.u.forward(&vector);
        let vv = self.v.forward(&vector);
        let vv_norm = (vv.square().sum_dim_intlist([1].as_slice(), false, Kind::Float) + NORM_EPS).sqrt();

        let a = self.mix_out.forward(&shifted_softplus(
            &self.mix_in.forward(&Tensor::cat(&[scalar.shallow_clone(), vv_norm], -1)),
        ));
        let a_vv = a.narrow(-1, 0, self.node_size);
        let a_sv = a.narrow(-1, self.node_size, self.node_size);
        let a_ss = a.narrow(-1, 2 * self.node_size, self.node_size);

        let inner = (&uv * &vv).sum_dim_intlist([1].as_slice(), false, Kind::Float);
        let scalar = scalar + a_sv * inner + a_ss;
        let vector = vector + a_vv.unsqueeze(1) * uv;
        (scalar, vector)
    }
}

/// Graph neural network mapping a concatenated graph batch to per-atom
/// embeddings of width `node_size`.
pub struct MessagePassingEncoder {
    embeddings: nn::Embedding,
    edge_updates: Vec<EdgeUpdater>,
    interactions: Vec<Interaction>,
    updates: Vec<ScalarVectorUpdate>,
    node_size: i64,
    cutoff: f64,
}

impl MessagePassingEncoder {
    pub fn new(
        p: &nn::Path,
        node_size: i64,
        num_interactions: usize,
        update_edges: bool,
        cutoff: f64,
    ) -> Self {
        let edge_size = gaussian_basis_size(GAUSSIAN_EXPANSION_STEP, cutoff);
        let embeddings = nn::embedding(
            p / "atom_embeddings",
            NUM_EMBEDDINGS,
            node_size,
            Default::default(),
        );

        let edge_updates = (0..num_interactions)
            .map(|i| {
                if update_edges {
                    EdgeUpdater::learned(&p.sub("edge_updates").sub(i), edge_size, node_size)
                } else {
                    EdgeUpdater::Identity
                }
            })
            .collect();
        let interactions = (0..num_interactions)
            .map(|i| Interaction::new(&p.sub("interactions").sub(i), node_size, edge_size))
            .collect();
        let updates = (0..num_interactions)
            .map(|i| ScalarVectorUpdate::new(&p.sub("scalar_vector_update").sub(i), node_size, edge_size))
            .collect();

        Self {
            embeddings,
            edge_updates,
            interactions,
            updates,
            node_size,
            cutoff,
        }
    }

    /// Width of the output embeddings.
    pub fn node_size(&self) -> i64 {
        self.node_size
    }

    pub fn updates_edges(&self) -> bool {
        self.edge_updates.iter().any(|e| !e.is_identity())
    }

    /// `(num_nodes, node_size)` embeddings, in the node order of `graph`.
    pub fn forward(&self, graph: &ConcatenatedGraph) -> Tensor {
        let num_nodes = graph.num_nodes();
        let device = graph.atomic_numbers.device();

        let mut scalar = self.embeddings.forward(&graph.atomic_numbers);
        let mut vector = Tensor::zeros([num_nodes, 3, self.node_size], (Kind::Float, device));
        let mut edge_state =
            gaussian_expansion(&graph.distances, GAUSSIAN_EXPANSION_STEP, self.cutoff);
        let directions = &graph.displacements / graph.distances.clamp_min(NORM_EPS);

        for ((edge_update, interaction), update) in self
            .edge_updates
            .iter()
            .zip(&self.interactions)
            .zip(&self.updates)
        {
            edge_state = edge_update.forward(&edge_state, &graph.edges, &scalar);
            scalar = interaction.forward(&scalar, &graph.edges, &edge_state);
            (scalar, vector) =
                update.forward(&scalar, &vector, &graph.edges, &edge_state, &directions);
        }

        scalar
    }
}
