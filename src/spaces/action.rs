//! Domain actions: which element to add and where.

use super::observation::Atom;
use crate::error::{AgentError, Result};

/// An action in the environment's representation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlacementAction {
    /// Index into the action-space vocabulary.
    pub element: usize,
    /// Cartesian position of the new atom.
    pub position: [f64; 3],
}

/// Element vocabulary used by the environment for placements.
///
/// By convention the dummy element `0` (`X`) is part of the vocabulary and
/// placing it terminates the episode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionSpace {
    zs: Vec<u8>,
}

impl ActionSpace {
    pub fn new(zs: Vec<u8>) -> Self {
        Self { zs }
    }

    pub fn zs(&self) -> &[u8] {
        &self.zs
    }

    /// Vocabulary index of an atomic number.
    pub fn element_index(&self, atomic_number: u8) -> Option<usize> {
        self.zs.iter().position(|&z| z == atomic_number)
    }

    /// Expresses a placed atom as a domain action.
    pub fn build(&self, atom: &Atom) -> Result<PlacementAction> {
        let element = self
            .element_index(atom.atomic_number)
            .ok_or(AgentError::UnknownElement(atom.atomic_number))?;
        Ok(PlacementAction {
            element,
            position: atom.position,
        })
    }

    /// The canonical terminate action: the dummy element at the origin.
    pub fn stop(&self) -> Result<PlacementAction> {
        self.build(&Atom::new(0, [0.0; 3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_index_lookup() {
        let space = ActionSpace::new(vec![0, 1, 6, 7, 8]);
        assert_eq!(space.element_index(6), Some(2));
        assert_eq!(space.element_index(9), None);
    }

    #[test]
    fn build_maps_atom() {
        let space = ActionSpace::new(vec![0, 1, 6]);
        let action = space.build(&Atom::new(6, [1.0, 2.0, 3.0])).unwrap();
        assert_eq!(action.element, 2);
        assert_eq!(action.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn stop_uses_dummy_element() {
        let space = ActionSpace::new(vec![0, 1, 6]);
        let action = space.stop().unwrap();
        assert_eq!(action.element, 0);
        assert_eq!(action.position, [0.0; 3]);
    }

    #[test]
    fn stop_without_dummy_is_an_error() {
        let space = ActionSpace::new(vec![1, 6]);
        assert!(matches!(space.stop(), Err(AgentError::UnknownElement(0))));
    }
}
