//! Teardown Reports
//!
//! `close()` never stops at the first failed release; each step's outcome is
//! collected here and handed back to the caller.

use alloc::vec::Vec;
use core::fmt;

use crate::cap::CapabilityToken;
use crate::error::ChannelError;

/// One release step of a teardown or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    /// Ending the control-page grant.
    RevokeControl,
    /// Ending the grant of data page `n`.
    RevokeData(usize),
    /// Returning the control page, or the range it was mapped into.
    FreeControl,
    /// Returning the data pages, or the range they were mapped into.
    FreeData,
    /// Unmapping peer data page `n`.
    UnmapData(usize),
    /// Unmapping the peer control page.
    UnmapControl,
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevokeControl => write!(f, "revoke control page"),
            Self::RevokeData(n) => write!(f, "revoke data page {}", n),
            Self::FreeControl => write!(f, "free control page"),
            Self::FreeData => write!(f, "free data pages"),
            Self::UnmapData(n) => write!(f, "unmap data page {}", n),
            Self::UnmapControl => write!(f, "unmap control page"),
        }
    }
}

/// A release step that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub step: ReleaseStep,
    pub error: ChannelError,
}

/// Aggregate outcome of a best-effort teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    failures: Vec<ReleaseFailure>,
    retained: Vec<ReleaseStep>,
}

impl TeardownReport {
    /// Create an empty report.
    pub const fn new() -> Self {
        Self {
            failures: Vec::new(),
            retained: Vec::new(),
        }
    }

    /// Record the outcome of `step`. Returns whether it succeeded.
    pub fn record(&mut self, step: ReleaseStep, result: Result<(), ChannelError>) -> bool {
        match result {
            Ok(()) => true,
            Err(error) => {
                self.failures.push(ReleaseFailure { step, error });
                false
            }
        }
    }

    /// Note that `step` was held back because a grant is still live.
    pub fn retain(&mut self, step: ReleaseStep) {
        self.retained.push(step);
    }

    /// Check that every step completed and nothing was held back.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.retained.is_empty()
    }

    /// Failed steps in the order they ran.
    pub fn failures(&self) -> &[ReleaseFailure] {
        &self.failures
    }

    /// Free steps postponed until every grant or mapping in the range is undone.
    pub fn retained(&self) -> &[ReleaseStep] {
        &self.retained
    }

    /// First error encountered, if any.
    pub fn first_error(&self) -> Option<ChannelError> {
        self.failures.first().map(|failure| failure.error)
    }

    /// Tokens whose revoke found the peer still mapping them.
    pub fn still_mapped(&self) -> impl Iterator<Item = CapabilityToken> + '_ {
        self.failures.iter().filter_map(|failure| match failure.error {
            ChannelError::PeerStillMapped(token) => Some(token),
            _ => None,
        })
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "clean");
        }
        write!(f, "{} failed step(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.step, failure.error)?;
        }
        if !self.retained.is_empty() {
            write!(f, "; {} release(s) deferred", self.retained.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::GrantStatus;

    #[test]
    fn test_report_collects_everything() {
        let mut report = TeardownReport::new();
        assert!(report.is_clean());
        assert!(report.record(ReleaseStep::RevokeControl, Ok(())));

        let token = CapabilityToken::new(12);
        assert!(!report.record(ReleaseStep::RevokeData(0), Err(ChannelError::PeerStillMapped(token))));
        assert!(!report.record(
            ReleaseStep::UnmapControl,
            Err(ChannelError::UnmapFailed(GrantStatus::BadHandle))
        ));
        report.retain(ReleaseStep::FreeData);

        assert!(!report.is_clean());
        assert_eq!(report.failures().len(), 2);
        assert_eq!(report.first_error(), Some(ChannelError::PeerStillMapped(token)));
        assert_eq!(report.still_mapped().collect::<Vec<_>>(), [token]);
        assert_eq!(report.retained(), &[ReleaseStep::FreeData]);
    }
}
