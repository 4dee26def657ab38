//! Internal action record, sub-action masks and selection strategies.

use std::fmt;

use crate::error::{AgentError, Result};

/// Number of fields in the flat action layout.
pub const ACTION_WIDTH: usize = 7;

/// One decision of the agent.
///
/// Flat layout (see [`Action::to_array`]):
/// `[stop, focus, element, distance, angle, dihedral, kappa]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Action {
    /// Terminate the episode. The agent itself never sets this.
    pub stop: bool,
    /// Index of the atom the new atom attaches to.
    pub focus: usize,
    /// Index into the bag vocabulary of the element to place.
    pub element: usize,
    /// Bond length to the focus.
    pub distance: f64,
    /// Bond angle at the focus.
    pub angle: f64,
    /// Unsigned dihedral; see [`Action::signed_dihedral`].
    pub dihedral: f64,
    /// Mirror choice: `true` flips the dihedral sign.
    pub kappa: bool,
}

impl Action {
    /// Flat `[stop, focus, element, distance, angle, dihedral, kappa]` form.
    pub fn to_array(&self) -> [f64; ACTION_WIDTH] {
        [
            f64::from(u8::from(self.stop)),
            self.focus as f64,
            self.element as f64,
            self.distance,
            self.angle,
            self.dihedral,
            f64::from(u8::from(self.kappa)),
        ]
    }

    /// Reads the flat layout, rounding the discrete fields.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ShapeMismatch`] unless `values` has exactly seven entries.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != ACTION_WIDTH {
            return Err(AgentError::shape("action width", ACTION_WIDTH, values.len()));
        }
        Ok(Self {
            stop: values[0].round() != 0.0,
            focus: values[1].round().max(0.0) as usize,
            element: values[2].round().max(0.0) as usize,
            distance: values[3],
            angle: values[4],
            dihedral: values[5],
            kappa: values[6].round() != 0.0,
        })
    }

    /// Dihedral with the mirror choice applied.
    pub fn signed_dihedral(&self) -> f64 {
        if self.kappa {
            -self.dihedral
        } else {
            self.dihedral
        }
    }
}

/// Maskable sub-actions, in mask order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubAction {
    Focus,
    Element,
    Distance,
    Angle,
    Dihedral,
    Kappa,
}

impl SubAction {
    pub const COUNT: usize = 6;

    pub fn all() -> [SubAction; Self::COUNT] {
        [
            SubAction::Focus,
            SubAction::Element,
            SubAction::Distance,
            SubAction::Angle,
            SubAction::Dihedral,
            SubAction::Kappa,
        ]
    }

    pub fn index(&self) -> usize {
        match self {
            SubAction::Focus => 0,
            SubAction::Element => 1,
            SubAction::Distance => 2,
            SubAction::Angle => 3,
            SubAction::Dihedral => 4,
            SubAction::Kappa => 5,
        }
    }

    /// Atoms that must already be placed for this sub-action to matter.
    pub fn min_atoms(&self) -> usize {
        match self {
            SubAction::Element => 0,
            SubAction::Focus | SubAction::Distance => 1,
            SubAction::Angle => 2,
            SubAction::Dihedral | SubAction::Kappa => 3,
        }
    }
}

impl fmt::Display for SubAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubAction::Focus => write!(f, "focus"),
            SubAction::Element => write!(f, "element"),
            SubAction::Distance => write!(f, "distance"),
            SubAction::Angle => write!(f, "angle"),
            SubAction::Dihedral => write!(f, "dihedral"),
            SubAction::Kappa => write!(f, "kappa"),
        }
    }
}

/// Which sub-actions are structurally meaningful for a molecule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionMask([f32; SubAction::COUNT]);

impl ActionMask {
    pub fn for_atom_count(num_atoms: usize) -> Self {
        let mut mask = [0.0; SubAction::COUNT];
        for sub in SubAction::all() {
            if num_atoms >= sub.min_atoms() {
                mask[sub.index()] = 1.0;
            }
        }
        Self(mask)
    }

    pub fn is_valid(&self, sub: SubAction) -> bool {
        self.0[sub.index()] != 0.0
    }

    pub fn as_array(&self) -> [f32; SubAction::COUNT] {
        self.0
    }
}

/// How every sub-action is chosen during one `step`.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    /// Draw from each distribution (training rollouts).
    Sample,
    /// Re-evaluate given actions, one per observation.
    Replay(&'a [Action]),
    /// Most likely category and distribution means (evaluation).
    Argmax,
}
