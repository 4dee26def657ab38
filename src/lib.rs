//! molagent - graph-network actor-critic for atom-by-atom molecule design
//!
//! Observations (placed atoms plus a bag of remaining elements) are turned
//! into cutoff neighbour graphs, embedded by a message-passing encoder, and
//! decoded into a focus atom, an element, internal coordinates and a mirror
//! choice for the next atom.

pub mod agent;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod nn;
pub mod spaces;

pub use agent::{Action, ActorCritic, AgentConfig, Selection, StepOutput};
pub use error::{AgentError, Result};
pub use geometry::position_atom_helper;
pub use spaces::{ActionSpace, Atom, Observation, ObservationSpace, PlacementAction};
