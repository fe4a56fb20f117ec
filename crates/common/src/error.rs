use thiserror::Error;

/// Canonical pfq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`PfqError::InvalidArgument`]: operator parameters rejected while an executor initializes
/// - [`PfqError::Storage`] / [`PfqError::Metadata`]: failures surfaced by collaborators
/// - [`PfqError::PlannerInvariant`]: a rebuilt plan failed validation; fatal, never retried
/// - [`PfqError::Execution`]: runtime operator evaluation or data-shape failures
/// - [`PfqError::StreamExhausted`]: `next_batch` called without a preceding `has_next() == true`
/// - [`PfqError::Suppressed`]: first failure of a release sequence plus the ones that followed
#[derive(Debug, Error)]
pub enum PfqError {
    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operator tree shape/name/type issues discovered before execution.
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime execution failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid arguments handed to an operator, detected at executor initialization.
    ///
    /// Examples:
    /// - unknown column referenced by a projection or sort key
    /// - aggregate over a non-numeric column
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure reported by a storage backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure reported by the metadata directory (fragments, storage units).
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A reconstructed operator tree failed validation after a runtime replan.
    ///
    /// This always signals a planner bug rather than a transient condition.
    #[error("planner invariant violated: {0}")]
    PlannerInvariant(String),

    /// `next_batch` was called on a stream with no further batches.
    #[error("batch stream exhausted")]
    StreamExhausted,

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented in current version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The first failure of a release sequence, with every later failure attached.
    #[error("{primary} ({} suppressed)", suppressed.len())]
    Suppressed {
        /// Failure that is reported to the caller.
        primary: Box<PfqError>,
        /// Failures observed after `primary`, in the order they happened.
        suppressed: Vec<PfqError>,
    },
}

impl PfqError {
    /// Attach `other` as suppressed detail, keeping `self` as the reported failure.
    #[must_use]
    pub fn with_suppressed(self, other: PfqError) -> PfqError {
        match self {
            PfqError::Suppressed {
                primary,
                mut suppressed,
            } => {
                suppressed.push(other);
                PfqError::Suppressed {
                    primary,
                    suppressed,
                }
            }
            primary => PfqError::Suppressed {
                primary: Box::new(primary),
                suppressed: vec![other],
            },
        }
    }

    /// The failure reported to the caller, looking through attached suppressed detail.
    pub fn primary(&self) -> &PfqError {
        match self {
            PfqError::Suppressed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Failures attached after the primary one.
    pub fn suppressed(&self) -> &[PfqError] {
        match self {
            PfqError::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Whether the query must fail without any retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self.primary(), PfqError::PlannerInvariant(_))
    }
}

/// Standard pfq result alias.
pub type Result<T> = std::result::Result<T, PfqError>;

#[cfg(test)]
mod tests {
    use super::PfqError;

    #[test]
    fn suppressed_keeps_first_failure() {
        let err = PfqError::Storage("left close failed".to_string())
            .with_suppressed(PfqError::Execution("right close failed".to_string()))
            .with_suppressed(PfqError::StreamExhausted);

        assert!(matches!(err.primary(), PfqError::Storage(_)));
        assert_eq!(err.suppressed().len(), 2);
        assert!(err.to_string().contains("left close failed"));
        assert!(err.to_string().contains("2 suppressed"));
    }

    #[test]
    fn planner_invariant_is_fatal_even_with_attachments() {
        let err = PfqError::PlannerInvariant("bad tree".to_string())
            .with_suppressed(PfqError::Storage("close".to_string()));
        assert!(err.is_fatal());
        assert!(!PfqError::Execution("x".to_string()).is_fatal());
    }
}
