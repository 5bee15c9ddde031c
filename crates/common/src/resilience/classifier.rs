//! Transient-failure classification
//!
//! Decides whether a [`Failure`] is worth retrying. The decision is a pure
//! function of the failure and the configured status set:
//!
//! - a remote-call failure with a status code is retriable only when the
//!   code is in the set
//! - a remote-call failure with no status code but a transport fault
//!   (connection refused, timeout) is retriable
//! - everything else is not

use std::collections::BTreeSet;

use crate::config::{ResilienceConfig, DEFAULT_RETRIABLE_STATUS_CODES};
use crate::error::{Failure, RemoteCallFailure};

/// Classifies failures as transient or permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriableClassifier {
    retriable_status: BTreeSet<u16>,
}

impl RetriableClassifier {
    /// Classifier treating exactly `codes` as transient status codes.
    pub fn new<I: IntoIterator<Item = u16>>(codes: I) -> Self {
        Self { retriable_status: codes.into_iter().collect() }
    }

    /// Classifier using the configured status codes.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.retriable_status_codes.iter().copied())
    }

    /// Whether `failure` is worth retrying.
    pub fn is_retriable(&self, failure: &Failure) -> bool {
        match failure {
            Failure::RemoteCall(remote) => self.is_retriable_remote(remote),
            Failure::Validation(_) | Failure::Authentication(_) => false,
        }
    }

    /// Whether a remote-call failure is worth retrying.
    pub fn is_retriable_remote(&self, failure: &RemoteCallFailure) -> bool {
        match failure.status_code {
            Some(code) => self.is_retriable_status(code),
            None => failure.transport.is_some(),
        }
    }

    /// Whether `code` is one of the transient status codes.
    pub fn is_retriable_status(&self, code: u16) -> bool {
        self.retriable_status.contains(&code)
    }

    /// The transient status codes, ascending.
    pub fn status_codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.retriable_status.iter().copied()
    }
}

impl Default for RetriableClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIABLE_STATUS_CODES)
    }
}
