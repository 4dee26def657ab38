//! Mirror (kappa) resolution.
//!
//! The continuous heads only produce an unsigned dihedral. To decide its sign
//! the new atom is placed both ways, each candidate molecule is re-embedded
//! through the encoder, and the two embeddings of the new atom are scored
//! against the next-step bag latent.

use tch::{Kind, Tensor};

use super::heads::ActionHeads;
use crate::geometry::position_atom_helper;
use crate::graph::{GraphBatcher, GraphBuilder};
use crate::nn::MessagePassingEncoder;
use crate::spaces::Atom;

/// Placement of the next atom before its dihedral sign is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub focus: usize,
    pub atomic_number: u8,
    pub distance: f64,
    pub angle: f64,
    pub dihedral: f64,
}

impl Candidate {
    /// Appends the new atom to `atoms` using `dihedral` as given.
    pub fn extend(&self, atoms: &[Atom], dihedral: f64) -> Vec<Atom> {
        let positions: Vec<[f64; 3]> = atoms.iter().map(|a| a.position).collect();
        let position =
            position_atom_helper(&positions, self.focus, self.distance, self.angle, dihedral);
        let mut extended = atoms.to_vec();
        extended.push(Atom::new(self.atomic_number, position));
        extended
    }
}

/// Scores the two mirror images of a batch of candidate placements.
pub struct KappaResolver<'a> {
    encoder: &'a MessagePassingEncoder,
    builder: &'a GraphBuilder,
    batcher: &'a GraphBatcher,
}

impl<'a> KappaResolver<'a> {
    pub fn new(
        encoder: &'a MessagePassingEncoder,
        builder: &'a GraphBuilder,
        batcher: &'a GraphBatcher,
    ) -> Self {
        Self {
            encoder,
            builder,
            batcher,
        }
    }

    /// `(batch, node_size)` embedding of the newly placed atom in every
    /// candidate molecule, with the dihedral negated when `mirrored`.
    pub fn surrogate_features(
        &self,
        molecules: &[Vec<Atom>],
        candidates: &[Candidate],
        mirrored: bool,
    ) -> Tensor {
        let graphs: Vec<_> = molecules
            .iter()
            .zip(candidates)
            .map(|(atoms, candidate)| {
                let dihedral = if mirrored {
                    -candidate.dihedral
                } else {
                    candidate.dihedral
                };
                self.builder.build(&candidate.extend(atoms, dihedral))
            })
            .collect();

        let batch = self.batcher.collate(&graphs);
        let nodes = self.encoder.forward(&batch.concatenate());

        // The new atom is the last node of each molecule.
        let new_atoms: Vec<i64> = batch
            .edge_offset()
            .iter()
            .zip(batch.num_nodes())
            .map(|(offset, n)| offset + n - 1)
            .collect();
        let index = Tensor::from_slice(&new_atoms).to_device(nodes.device());
        nodes.index_select(0, &index)
    }

    /// `(batch, 2)` logits: column 0 keeps the dihedral, column 1 flips it.
    pub fn kappa_logits(
        &self,
        heads: &ActionHeads,
        molecules: &[Vec<Atom>],
        candidates: &[Candidate],
        latent_bag_next: &Tensor,
    ) -> Tensor {
        let score = |mirrored: bool| {
            let features = self.surrogate_features(molecules, candidates, mirrored);
            heads.kappa_score(&Tensor::cat(&[features, latent_bag_next.shallow_clone()], -1))
        };
        let v0 = score(false);
        let v1 = score(true);
        Tensor::cat(&[v0, v1], -1).to_kind(Kind::Float)
    }
}
