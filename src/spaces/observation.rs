//! Observation encoding: a canvas of placed atoms plus a bag of remaining elements.

use crate::error::{AgentError, Result};

/// A placed atom.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Atom {
    /// Atomic number (1 = H, 6 = C, ...). `0` marks an empty canvas slot.
    pub atomic_number: u8,
    /// Cartesian position in Ångström.
    pub position: [f64; 3],
}

impl Atom {
    pub fn new(atomic_number: u8, position: [f64; 3]) -> Self {
        Self {
            atomic_number,
            position,
        }
    }

    /// Euclidean distance to another atom.
    pub fn distance_to(&self, other: &Atom) -> f64 {
        let [dx, dy, dz] = self.displacement_to(other);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Vector pointing from `self` to `other`.
    pub fn displacement_to(&self, other: &Atom) -> [f64; 3] {
        [
            other.position[0] - self.position[0],
            other.position[1] - self.position[1],
            other.position[2] - self.position[2],
        ]
    }
}

/// Remaining elements, in the fixed order of the bag vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    entries: Vec<(u8, u32)>,
}

impl Bag {
    /// Pairs each vocabulary element with its remaining count.
    pub fn new(zs: &[u8], counts: &[u32]) -> Result<Self> {
        if zs.len() != counts.len() {
            return Err(AgentError::shape("bag length", zs.len(), counts.len()));
        }
        Ok(Self {
            entries: zs.iter().copied().zip(counts.iter().copied()).collect(),
        })
    }

    /// Counts in vocabulary order.
    pub fn counts(&self) -> Vec<u32> {
        self.entries.iter().map(|&(_, count)| count).collect()
    }

    /// Atomic number at the given vocabulary index.
    pub fn atomic_number(&self, index: usize) -> Option<u8> {
        self.entries.get(index).map(|&(z, _)| z)
    }

    /// Total number of atoms left to place.
    pub fn total(&self) -> u32 {
        self.entries.iter().map(|&(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Raw observation handed to the agent by the environment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Observation {
    /// Canvas slots; slots whose atomic number is `0` are empty.
    pub canvas: Vec<Atom>,
    /// Remaining count per bag-vocabulary element.
    pub bag: Vec<u32>,
}

/// Describes the shape of observations: canvas capacity and bag vocabulary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservationSpace {
    canvas_size: usize,
    bag_zs: Vec<u8>,
}

impl ObservationSpace {
    /// Creates a space holding up to `canvas_size` atoms drawn from `bag_zs`.
    pub fn new(canvas_size: usize, bag_zs: Vec<u8>) -> Self {
        Self {
            canvas_size,
            bag_zs,
        }
    }

    /// Maximum number of atoms on the canvas.
    pub fn canvas_size(&self) -> usize {
        self.canvas_size
    }

    /// Number of element types in the bag vocabulary.
    pub fn num_zs(&self) -> usize {
        self.bag_zs.len()
    }

    /// Bag vocabulary, in bag order.
    pub fn bag_zs(&self) -> &[u8] {
        &self.bag_zs
    }

    /// Atomic number of the bag entry at `index`.
    pub fn bag_z(&self, index: usize) -> Option<u8> {
        self.bag_zs.get(index).copied()
    }

    /// Splits an observation into placed atoms and the remaining bag.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ShapeMismatch`] if the bag length differs from the
    /// vocabulary size or the canvas is larger than `canvas_size`.
    pub fn parse(&self, observation: &Observation) -> Result<(Vec<Atom>, Bag)> {
        if observation.canvas.len() > self.canvas_size {
            return Err(AgentError::shape(
                "canvas length",
                self.canvas_size,
                observation.canvas.len(),
            ));
        }
        let atoms = observation
            .canvas
            .iter()
            .filter(|atom| atom.atomic_number != 0)
            .copied()
            .collect();
        let bag = Bag::new(&self.bag_zs, &observation.bag)?;
        Ok((atoms, bag))
    }

    /// Builds an observation from placed atoms and bag counts.
    pub fn build(&self, atoms: &[Atom], counts: &[u32]) -> Result<Observation> {
        let observation = Observation {
            canvas: atoms.to_vec(),
            bag: counts.to_vec(),
        };
        self.parse(&observation)?;
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> ObservationSpace {
        // X, H, C, O
        ObservationSpace::new(6, vec![0, 1, 6, 8])
    }

    #[test]
    fn parse_skips_empty_slots() {
        let obs = Observation {
            canvas: vec![
                Atom::new(6, [0.0, 0.0, 0.0]),
                Atom::new(0, [0.0, 0.0, 0.0]),
                Atom::new(8, [1.2, 0.0, 0.0]),
            ],
            bag: vec![0, 4, 1, 0],
        };
        let (atoms, bag) = space().parse(&obs).unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[1].atomic_number, 8);
        assert_eq!(bag.counts(), vec![0, 4, 1, 0]);
        assert_eq!(bag.atomic_number(2), Some(6));
        assert_eq!(bag.total(), 5);
    }

    #[test]
    fn parse_rejects_wrong_bag_length() {
        let obs = Observation {
            canvas: vec![],
            bag: vec![1, 2],
        };
        let err = space().parse(&obs).unwrap_err();
        assert!(matches!(
            err,
            AgentError::ShapeMismatch {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn parse_rejects_oversized_canvas() {
        let obs = Observation {
            canvas: vec![Atom::new(1, [0.0; 3]); 7],
            bag: vec![0, 0, 0, 0],
        };
        assert!(space().parse(&obs).is_err());
    }

    #[test]
    fn atom_distance() {
        let a = Atom::new(1, [0.0, 0.0, 0.0]);
        let b = Atom::new(1, [3.0, 4.0, 0.0]);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
        assert_eq!(a.displacement_to(&b), [3.0, 4.0, 0.0]);
    }

    #[test]
    fn empty_bag() {
        let bag = Bag::new(&[1, 6], &[0, 0]).unwrap();
        assert!(bag.is_empty());
    }
}
