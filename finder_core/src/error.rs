//! Error taxonomy.
//!
//! Only [`ConfigError`] ever leaves the library: it is raised while building a
//! [`crate::pipeline::TrackFinder`], before any event is processed.
//! [`RecoverableError`] values describe local failures inside one event; they
//! are recorded in the event diagnostics and processing continues.

use crate::types::ChannelId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown {kind} '{name}' (known: {known})")]
    UnknownName {
        kind: &'static str,
        name: String,
        known: String,
    },

    #[error("parameter '{name}' = {value} out of range: {reason}")]
    OutOfRange {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(
        name: &'static str,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        ConfigError::OutOfRange {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

/// Per-hit or per-candidate failure, recovered locally.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RecoverableError {
    #[error("hit on channel {channel:?} dropped: {reason}")]
    GeometryInconsistency {
        channel: Option<ChannelId>,
        reason: String,
    },

    #[error("{stage}: fit did not converge: {reason}")]
    FitNonConvergence { stage: &'static str, reason: String },

    #[error("{stage}: bound '{bound}' = {limit} reached, search truncated")]
    CombinatorialOverflow {
        stage: &'static str,
        bound: &'static str,
        limit: usize,
    },
}

impl RecoverableError {
    pub fn is_geometry(&self) -> bool {
        matches!(self, RecoverableError::GeometryInconsistency { .. })
    }

    pub fn is_fit(&self) -> bool {
        matches!(self, RecoverableError::FitNonConvergence { .. })
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, RecoverableError::CombinatorialOverflow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let e = ConfigError::UnknownName {
            kind: "facet filter",
            name: "bogus".into(),
            known: "all, chi2".into(),
        };
        assert!(e.to_string().contains("bogus"));

        let o = RecoverableError::CombinatorialOverflow {
            stage: "hough",
            bound: "maxBoxes",
            limit: 10,
        };
        assert!(o.is_overflow());
        assert!(o.to_string().contains("maxBoxes"));
    }
}
