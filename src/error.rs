use thiserror::Error;

use crate::ir::FormatKind;

/// Engine error kinds.
///
/// `PatternOverlapRejected` and `EmptyCapture` are detection diagnostics and
/// never fail an operation. `InvalidDocument` aborts a whole batch; every
/// other kind is reported per fill key.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FillError {
    #[error("{dropped_kind:?} match {dropped:?} overlaps accepted match {kept:?}")]
    PatternOverlapRejected {
        kept: String,
        dropped: String,
        dropped_kind: FormatKind,
    },

    #[error("{kind:?} match {text:?} has no usable content")]
    EmptyCapture { text: String, kind: FormatKind },

    #[error("no occurrence matches fill key {key:?}")]
    OccurrenceNotFound { key: String },

    #[error("fill key {key:?} resolves to the same occurrence as {others:?}")]
    DuplicateResolution { key: String, others: Vec<String> },

    #[error("occurrence {text:?} at {container} [{start}, {end}) no longer matches the paragraph text")]
    StaleOccurrence {
        text: String,
        container: String,
        start: usize,
        end: usize,
    },

    #[error("container {container} is unusable: {reason}")]
    InvalidDocument { container: String, reason: String },
}

impl FillError {
    /// Whether the error aborts the whole batch instead of a single key.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FillError::InvalidDocument { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FillError::PatternOverlapRejected { .. } => "pattern_overlap_rejected",
            FillError::EmptyCapture { .. } => "empty_capture",
            FillError::OccurrenceNotFound { .. } => "occurrence_not_found",
            FillError::DuplicateResolution { .. } => "duplicate_resolution",
            FillError::StaleOccurrence { .. } => "stale_occurrence",
            FillError::InvalidDocument { .. } => "invalid_document",
        }
    }
}
