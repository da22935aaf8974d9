use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Where a result came from. Synthetic data is shaped like live data but is
/// not a market observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Provenance {
    Live { source: String },
    Synthetic { kind: ErrorKind, reason: String },
}

impl Provenance {
    pub fn live(source: impl Into<String>) -> Self {
        Provenance::Live { source: source.into() }
    }

    pub fn synthetic(cause: &Error) -> Self {
        Provenance::Synthetic {
            kind: cause.kind(),
            reason: cause.message().to_string(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Provenance::Synthetic { .. })
    }

    /// The failure that forced a synthetic result, if any.
    pub fn failure(&self) -> Option<Error> {
        match self {
            Provenance::Live { .. } => None,
            Provenance::Synthetic { kind, reason } => Some(Error::new(*kind, reason.clone())),
        }
    }
}

/// A value tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Sourced<T> {
    pub fn live(value: T, source: impl Into<String>) -> Self {
        Self { value, provenance: Provenance::live(source) }
    }

    pub fn synthetic(value: T, cause: &Error) -> Self {
        Self { value, provenance: Provenance::synthetic(cause) }
    }

    pub fn is_synthetic(&self) -> bool {
        self.provenance.is_synthetic()
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Sourced<U> {
        Sourced { value: f(self.value), provenance: self.provenance }
    }
}
