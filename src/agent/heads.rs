//! Feed-forward heads mapping latent states to sub-action distributions and
//! the state value.

use std::f64::consts::PI;

use tch::{nn, Tensor};

use super::config::AgentConfig;
use crate::nn::Mlp;

/// Initial standard deviations of the distance, angle and dihedral heads.
pub const INITIAL_STDS: [f32; 3] = [0.15, 0.25, 0.25];

/// Added to the log-std before exponentiation.
pub const STD_EPS: f64 = 1e-6;

/// Affine map from `[-1, 1]` onto a `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub center: f64,
    pub width: f64,
}

impl Rescale {
    pub fn from_range(min: f64, max: f64) -> Self {
        Self {
            center: 0.5 * (max + min),
            width: max - min,
        }
    }

    /// `center + x · width / 2`.
    pub fn apply(&self, x: &Tensor) -> Tensor {
        x * (self.width / 2.0) + self.center
    }
}

/// Means of the three continuous sub-actions, each `(batch, 1)`.
#[derive(Debug)]
pub struct ContinuousMeans {
    pub distance: Tensor,
    pub angle: Tensor,
    pub dihedral: Tensor,
}

/// All learned heads of the actor and the critic.
pub struct ActionHeads {
    phi_beta: Mlp,
    phi_focus: Mlp,
    phi_element: Mlp,
    phi_continuous: Mlp,
    phi_kappa: Mlp,
    critic: Mlp,
    log_stds: Tensor,
    distance: Rescale,
    angle: Rescale,
    dihedral: Rescale,
}

impl ActionHeads {
    pub fn new(p: &nn::Path, config: &AgentConfig, num_zs: i64) -> Self {
        let width = config.network_width as i64;
        let num_latent = config.num_latent();

        Self {
            phi_beta: Mlp::new(&(p / "phi_beta"), num_zs, &[width, config.num_latent_beta()]),
            phi_focus: Mlp::new(&(p / "phi_focus"), num_latent, &[width, 1]),
            phi_element: Mlp::new(&(p / "phi_element"), num_latent, &[width, num_zs]),
            phi_continuous: Mlp::new(&(p / "phi_continuous"), num_latent + num_zs, &[width, 3]),
            phi_kappa: Mlp::new(&(p / "phi_kappa"), num_latent, &[width, 1]),
            critic: Mlp::new(&(p / "critic"), num_latent, &[width, width, 1]),
            log_stds: p.var_copy("log_stds", &Tensor::from_slice(&INITIAL_STDS).log()),
            distance: Rescale::from_range(config.min_distance(), config.max_distance()),
            angle: Rescale::from_range(0.0, PI),
            dihedral: Rescale::from_range(0.0, PI),
        }
    }

    /// `(batch, num_zs)` bag counts to `(batch, num_latent_beta)`.
    pub fn bag_latent(&self, element_count: &Tensor) -> Tensor {
        self.phi_beta.forward(element_count)
    }

    /// `(batch, atoms, num_latent)` to `(batch, atoms)` focus logits.
    pub fn focus_logits(&self, latent_states: &Tensor) -> Tensor {
        self.phi_focus.forward(latent_states).squeeze_dim(-1)
    }

    /// `(batch, num_latent)` focused atom to `(batch, num_zs)` element logits.
    pub fn element_logits(&self, focused_atom: &Tensor) -> Tensor {
        self.phi_element.forward(focused_atom)
    }

    /// Means of distance, angle and dihedral given the focused atom and the
    /// one-hot element, squashed with `tanh` and rescaled into their ranges.
    pub fn continuous_means(&self, focused_atom: &Tensor, element_oh: &Tensor) -> ContinuousMeans {
        let f = Tensor::cat(&[focused_atom.shallow_clone(), element_oh.shallow_clone()], -1);
        let squashed = self.phi_continuous.forward(&f).tanh();
        ContinuousMeans {
            distance: self.distance.apply(&squashed.narrow(-1, 0, 1)),
            angle: self.angle.apply(&squashed.narrow(-1, 1, 1)),
            dihedral: self.dihedral.apply(&squashed.narrow(-1, 2, 1)),
        }
    }

    /// `(3,)` state-independent standard deviations.
    pub fn stds(&self) -> Tensor {
        (&self.log_stds + STD_EPS).exp()
    }

    /// `(batch, num_latent)` candidate latent to a `(batch, 1)` mirror score.
    pub fn kappa_score(&self, candidate: &Tensor) -> Tensor {
        self.phi_kappa.forward(candidate)
    }

    /// `(batch, num_latent)` pooled state to `(batch,)` value estimate.
    pub fn value(&self, pooled: &Tensor) -> Tensor {
        self.critic.forward(pooled).squeeze_dim(-1)
    }
}
