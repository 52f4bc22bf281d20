//! Diagnostic sink for recoverable failures.
//!
//! Every component reports through one [`Diagnostics`] handle instead of
//! returning errors across rule or step boundaries. Handles are cheap to
//! clone and share the same buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{ErrorKind, KIND_COUNT, RuleError};

/// Shared sink for recoverable rule errors.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<Mutex<DiagnosticsInner>>,
}

struct DiagnosticsInner {
    /// Most recent errors, oldest first.
    history: VecDeque<RuleError>,
    /// Maximum retained history.
    limit: usize,
    /// Lifetime count per kind.
    counts: [u64; KIND_COUNT],
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Diagnostics")
            .field("retained", &inner.history.len())
            .field("counts", &inner.counts)
            .finish()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Diagnostics {
    /// Create a sink retaining up to `limit` recent errors.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DiagnosticsInner {
                history: VecDeque::with_capacity(limit),
                limit,
                counts: [0; KIND_COUNT],
            })),
        }
    }

    /// Report a recoverable error.
    pub fn report(&self, error: RuleError) {
        let kind = error.kind();
        match kind {
            ErrorKind::StaleReference => trace!(kind = kind.as_str(), "{error}"),
            _ => warn!(kind = kind.as_str(), "{error}"),
        }

        let mut inner = self.inner.lock();
        inner.counts[kind.slot()] += 1;
        if inner.limit == 0 {
            return;
        }
        if inner.history.len() == inner.limit {
            inner.history.pop_front();
        }
        inner.history.push_back(error);
    }

    /// Number of errors of `kind` reported since creation.
    #[must_use]
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.inner.lock().counts[kind.slot()]
    }

    /// Total number of errors reported since creation.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.inner.lock().counts.iter().sum()
    }

    /// Copy of the retained history, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuleError> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Take the retained history, leaving counts untouched.
    pub fn drain(&self) -> Vec<RuleError> {
        self.inner.lock().history.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_kind() {
        let diag = Diagnostics::new(8);
        diag.report(RuleError::syntax("selector", "empty selector"));
        diag.report(RuleError::conversion("id", "expected string"));
        diag.report(RuleError::conversion("tags", "expected array"));

        assert_eq!(diag.count(ErrorKind::Syntax), 1);
        assert_eq!(diag.count(ErrorKind::Conversion), 2);
        assert_eq!(diag.count(ErrorKind::Evaluation), 0);
        assert_eq!(diag.total(), 3);
    }

    #[test]
    fn test_history_is_bounded() {
        let diag = Diagnostics::new(2);
        for i in 0..5 {
            diag.report(RuleError::syntax("path", format!("bad {i}")));
        }

        let history = diag.snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], RuleError::syntax("path", "bad 4"));
        assert_eq!(diag.total(), 5);
    }

    #[test]
    fn test_clones_share_state() {
        let diag = Diagnostics::new(4);
        let other = diag.clone();
        other.report(RuleError::evaluation("r", "boom"));

        assert_eq!(diag.drain().len(), 1);
        assert!(other.snapshot().is_empty());
        assert_eq!(diag.count(ErrorKind::Evaluation), 1);
    }
}
