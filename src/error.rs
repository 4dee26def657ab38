use thiserror::Error;

/// Errors surfaced by the agent and its collaborators.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A tensor or vector did not have the width the agent was configured for.
    #[error("{what}: expected size {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// Element present in the bag vocabulary but not in the action vocabulary.
    #[error("Atomic number {0} is not part of the action space")]
    UnknownElement(u8),

    #[error(transparent)]
    Tensor(#[from] tch::TchError),
}

impl AgentError {
    pub(crate) fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        AgentError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_message_names_the_field() {
        let err = AgentError::shape("action width", 7, 5);
        assert_eq!(err.to_string(), "action width: expected size 7, got 5");
    }

    #[test]
    fn unknown_element_message() {
        let err = AgentError::UnknownElement(9);
        assert!(err.to_string().contains('9'));
    }
}
