//! Correlation identifiers for a unit of work
//!
//! A workflow run enters a [`scope`] once; every event emitted on that thread
//! until the guard drops carries the same identifier, both as a field on the
//! event and through the enclosing `workflow` span.
//!
//! ```rust
//! use bulwark_common::observability::correlation::{self, CorrelationId};
//!
//! assert!(correlation::current().is_none());
//! {
//!     let _scope = correlation::scope(CorrelationId::from("run-42"));
//!     assert_eq!(correlation::current().unwrap().as_str(), "run-42");
//! }
//! assert!(correlation::current().is_none());
//! ```

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::span::EnteredSpan;
use uuid::Uuid;

thread_local! {
    static CURRENT: RefCell<Option<CorrelationId>> = const { RefCell::new(None) };
}

/// Identifier shared by every event of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Guard returned by [`scope`].
///
/// Dropping it restores whichever identifier was active before and exits
/// the `workflow` span. It is tied to the thread that created it.
#[must_use = "the correlation id is cleared as soon as the guard is dropped"]
pub struct CorrelationScope {
    previous: Option<CorrelationId>,
    _span: EnteredSpan,
}

impl fmt::Debug for CorrelationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationScope").field("previous", &self.previous).finish()
    }
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Make `id` the current correlation identifier until the guard drops.
pub fn scope(id: CorrelationId) -> CorrelationScope {
    let span = tracing::info_span!("workflow", correlation_id = %id).entered();
    let previous = CURRENT.with(|current| current.borrow_mut().replace(id));
    CorrelationScope { previous, _span: span }
}

/// The correlation identifier active on this thread, if any.
pub fn current() -> Option<CorrelationId> {
    CURRENT.with(|current| current.borrow().clone())
}
