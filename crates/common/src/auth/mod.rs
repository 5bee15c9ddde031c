//! Credentials for external services
//!
//! - **[`Secret`]**: zeroize-on-drop credential string that never prints
//!   its raw value
//! - **[`CredentialCache`]**: one credential per service with an expiry
//!   safety margin and serialized refresh
//! - **[`with_credential_refresh`]**: run an operation, refreshing the
//!   credential and retrying once if it is rejected
//!
//! Authentication failures are never retried by the retry executor; the
//! refresh-once path here is the only automatic recovery for them.

pub mod credential_cache;
pub mod secret;

pub use credential_cache::{with_credential_refresh, CredentialCache, IssuedCredential};
pub use secret::Secret;
