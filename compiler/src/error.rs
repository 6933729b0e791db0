//! Outcomes of a rolling attempt that did not produce a loop.
//!
//! None of these abort the pass: the roller logs the reason at debug level,
//! rolls back whatever was emitted and moves on to the next candidate.

use crate::rolling::node::NodeId;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollError {
    /// Collapsing the lanes would reorder memory or side effects
    NotSchedulable,

    /// The rolled code is not small enough
    Unprofitable { original: i64, rolled: i64 },

    /// The graph cannot be turned into code
    InvalidGraph(String),

    /// A node that should already have been generated has no value
    MissingValue(NodeId),
}

impl fmt::Display for RollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollError::NotSchedulable => write!(f, "aligned graph is not schedulable"),
            RollError::Unprofitable { original, rolled } => {
                write!(f, "not profitable: original cost {}, rolled cost {}", original, rolled)
            }
            RollError::InvalidGraph(reason) => write!(f, "invalid aligned graph: {}", reason),
            RollError::MissingValue(node) => write!(f, "no generated value for node {}", node),
        }
    }
}

impl std::error::Error for RollError {}

pub type RollResult<T> = Result<T, RollError>;
