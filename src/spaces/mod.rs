//! Observation and action spaces.
//!
//! The agent does not interpret raw environment data itself: it asks the
//! [`ObservationSpace`] to split an observation into the placed atoms and the
//! remaining-element bag, and hands finished placements to the
//! [`ActionSpace`] to be expressed in the environment's own indexing.

pub mod action;
pub mod observation;

pub use action::{ActionSpace, PlacementAction};
pub use observation::{Atom, Bag, Observation, ObservationSpace};
