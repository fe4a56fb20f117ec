//! Release of owned resources.
//!
//! Every stream, executor and task result is closed through [`Close`]. Closing several
//! resources goes through a [`CloseChain`]: each resource is closed even when an
//! earlier one failed, the first failure is reported and later failures are
//! attached to it as suppressed detail.

use pfq_common::{PfqError, Result};
use tracing::warn;

/// A resource with an explicit, idempotent release step.
pub trait Close {
    /// Release everything owned. Calling it again is a no-op returning `Ok(())`.
    fn close(&mut self) -> Result<()>;
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// First-failure-wins accumulator for a release sequence.
#[derive(Debug, Default)]
#[must_use = "a close chain reports its failures from `finish`"]
pub struct CloseChain {
    error: Option<PfqError>,
}

impl CloseChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a release sequence triggered by `cause`; it stays the reported failure.
    pub fn after(cause: PfqError) -> Self {
        Self { error: Some(cause) }
    }

    /// Record the outcome of one release step.
    pub fn record(&mut self, outcome: Result<()>) -> &mut Self {
        if let Err(e) = outcome {
            self.error = Some(match self.error.take() {
                Some(first) => first.with_suppressed(e),
                None => e,
            });
        }
        self
    }

    pub fn close<C: Close + ?Sized>(&mut self, resource: &mut C) -> &mut Self {
        self.record(resource.close())
    }

    /// Close every resource of `resources`, last one first.
    pub fn close_all_rev<C: Close>(&mut self, resources: &mut [C]) -> &mut Self {
        for resource in resources.iter_mut().rev() {
            self.close(resource);
        }
        self
    }

    pub fn finish(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The failure to report; only meaningful for chains started with [`CloseChain::after`].
    pub fn into_error(self) -> PfqError {
        self.error
            .unwrap_or_else(|| PfqError::Execution("release sequence without a cause".to_string()))
    }
}

/// Close `resource` from a drop path, logging instead of reporting a failure.
pub fn close_quietly<C: Close + ?Sized>(resource: &mut C, what: &str) {
    if let Err(e) = resource.close() {
        warn!(resource = what, error = %e, "best-effort close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        fail: Option<&'static str>,
        closes: usize,
    }

    impl Close for Flaky {
        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            match self.fail {
                Some(msg) => Err(PfqError::Storage(msg.to_string())),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn every_resource_is_closed_and_first_failure_wins() {
        let mut resources = vec![
            Flaky {
                fail: Some("first opened"),
                closes: 0,
            },
            Flaky {
                fail: None,
                closes: 0,
            },
            Flaky {
                fail: Some("last opened"),
                closes: 0,
            },
        ];
        let mut chain = CloseChain::new();
        chain.close_all_rev(&mut resources);
        let err = chain.finish().expect_err("two closes failed");
        assert!(resources.iter().all(|r| r.closes == 1));
        // reverse order: the last opened resource is released first
        assert!(matches!(err.primary(), PfqError::Storage(m) if m == "last opened"));
        assert_eq!(err.suppressed().len(), 1);
    }

    #[test]
    fn cause_stays_primary() {
        let mut r = Flaky {
            fail: Some("close"),
            closes: 0,
        };
        let mut chain = CloseChain::after(PfqError::InvalidArgument("bad limit".to_string()));
        chain.close(&mut r);
        let err = chain.into_error();
        assert!(matches!(err.primary(), PfqError::InvalidArgument(_)));
        assert_eq!(err.suppressed().len(), 1);
    }
}
