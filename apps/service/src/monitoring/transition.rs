use serde::{Deserialize, Serialize};
use std::fmt;

/// How a new observation relates to the cached one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// The monitor had never been checked before
    NoObservation,
    Unchanged,
    BecameDown,
    BecameUp,
}

impl Transition {
    /// Compare the previous cached state with the state just observed.
    ///
    /// `previous` is `None` until the first check completes; that first
    /// observation never counts as a transition.
    pub fn classify(previous: Option<bool>, current: bool) -> Self {
        match (previous, current) {
            (None, _) => Transition::NoObservation,
            (Some(true), false) => Transition::BecameDown,
            (Some(false), true) => Transition::BecameUp,
            (Some(_), _) => Transition::Unchanged,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::NoObservation => write!(f, "first observation"),
            Transition::Unchanged => write!(f, "unchanged"),
            Transition::BecameDown => write!(f, "down"),
            Transition::BecameUp => write!(f, "recovered"),
        }
    }
}
