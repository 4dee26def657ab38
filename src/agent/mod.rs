//! The molecular actor-critic: configuration, action records, heads and the
//! staged decision process.

pub mod action;
pub mod actor_critic;
pub mod config;
pub mod heads;
pub mod kappa;

pub use action::{Action, ActionMask, Selection, SubAction, ACTION_WIDTH};
pub use actor_critic::{ActorCritic, AtomicTensors, StepOutput};
pub use config::AgentConfig;
pub use heads::ActionHeads;
pub use kappa::{Candidate, KappaResolver};
