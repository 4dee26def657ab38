//! Configuration for the actor-critic agent.

use crate::error::{AgentError, Result};

/// Construction-time settings of the actor-critic network.
///
/// All values are fixed for the agent's lifetime. The compute device is
/// passed separately to [`super::ActorCritic::new`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentConfig {
    // --- Geometry ---
    /// Range `(min, max)` of the bond distance head, in Ångström.
    pub min_max_distance: (f64, f64),
    /// Neighbour cutoff radius of the molecular graph, in Ångström.
    pub cutoff: f64,

    // --- Network ---
    /// Width of hidden layers. Atom embeddings are `width / 2` wide and the
    /// bag summary `width / 4`.
    pub network_width: usize,
    /// Number of message-passing blocks.
    pub num_interactions: usize,
    /// Whether each block recomputes edge states from node states.
    pub update_edges: bool,

    // --- Sampling ---
    /// Seed of the sampling stream.
    pub seed: u64,
}

impl AgentConfig {
    /// Width of a per-atom embedding.
    pub fn num_afeats(&self) -> i64 {
        (self.network_width / 2) as i64
    }

    /// Width of the bag summary.
    pub fn num_latent_beta(&self) -> i64 {
        (self.network_width / 4) as i64
    }

    /// Width of an atom latent: embedding plus bag summary.
    pub fn num_latent(&self) -> i64 {
        self.num_afeats() + self.num_latent_beta()
    }

    pub fn min_distance(&self) -> f64 {
        self.min_max_distance.0
    }

    pub fn max_distance(&self) -> f64 {
        self.min_max_distance.1
    }

    /// Checks the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.network_width < 4 || self.network_width % 4 != 0 {
            return Err(AgentError::InvalidConfig(format!(
                "network_width must be a positive multiple of 4, got {}",
                self.network_width
            )));
        }
        if self.num_interactions == 0 {
            return Err(AgentError::InvalidConfig(
                "num_interactions must be at least 1".into(),
            ));
        }
        if !(self.cutoff > 0.0) {
            return Err(AgentError::InvalidConfig(format!(
                "cutoff must be positive, got {}",
                self.cutoff
            )));
        }
        let (min, max) = self.min_max_distance;
        if !(min > 0.0 && min < max) {
            return Err(AgentError::InvalidConfig(format!(
                "min_max_distance must satisfy 0 < min < max, got ({min}, {max})"
            )));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            min_max_distance: (0.95, 1.80),
            cutoff: 5.0,
            network_width: 128,
            num_interactions: 3,
            update_edges: true,
            seed: 0,
        }
    }
}
