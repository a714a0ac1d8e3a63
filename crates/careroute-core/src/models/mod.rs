//! Domain models for case routing.

mod care_team;
mod case;
mod ids;
mod provider;
mod queue;

pub use care_team::*;
pub use case::*;
pub use ids::*;
pub use provider::*;
pub use queue::*;

use thiserror::Error;

/// A stored label that does not match any known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {label}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

impl UnknownLabel {
    pub fn new(kind: &'static str, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
        }
    }
}
