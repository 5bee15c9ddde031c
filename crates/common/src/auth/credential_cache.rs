//! Per-service credential cache with expiry margin
//!
//! Holds at most one credential per service name. A credential counts as
//! expired once `now >= expires_at - margin` (or when the margin exceeds its
//! whole lifetime) so it is never presented to a remote service in its last
//! few seconds of validity.
//!
//! Refreshes go through [`CredentialCache::get_or_refresh`], which holds the
//! service's slot lock for the whole refresh. Concurrent callers for the same
//! service wait for the in-flight refresh and then reuse its result instead of
//! issuing a second authentication request. The refresh function must not
//! call back into the cache for the same service.
//!
//! ```rust
//! use bulwark_common::auth::{CredentialCache, IssuedCredential};
//! use bulwark_common::config::CredentialSettings;
//!
//! let cache = CredentialCache::new(&CredentialSettings::default());
//! let token = cache
//!     .get_or_refresh("ledger", || Ok(IssuedCredential::new("tok-1", 3_600)))
//!     .unwrap();
//!
//! assert_eq!(token.expose(), "tok-1");
//! assert!(!cache.is_expired("ledger"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;

use super::secret::Secret;
use crate::config::{CredentialSettings, MAX_CREDENTIAL_LIFETIME};
use crate::error::{AuthenticationFailure, Context, Failure};
use crate::observability::{emit, EventLevel};
use crate::time::{Clock, SystemClock};

const COMPONENT: &str = "credential_cache";

/// A credential returned by a refresh function.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// The credential itself.
    pub secret: Secret,
    /// Lifetime from the moment it is cached.
    pub expires_in: Duration,
}

impl IssuedCredential {
    /// Credential valid for `expires_in_secs` seconds.
    pub fn new<S: Into<Secret>>(secret: S, expires_in_secs: u64) -> Self {
        Self { secret: secret.into(), expires_in: Duration::from_secs(expires_in_secs) }
    }
}

struct CachedCredential {
    secret: Secret,
    issued_at: Instant,
    expires_at: Instant,
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("secret", &self.secret)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type Slot = Arc<Mutex<Option<CachedCredential>>>;

/// Cache of service credentials.
pub struct CredentialCache<C: Clock = SystemClock> {
    entries: DashMap<String, Slot>,
    margin: Duration,
    clock: C,
}

impl<C: Clock> fmt::Debug for CredentialCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("margin", &self.margin)
            .field("services", &self.entries.len())
            .finish()
    }
}

impl CredentialCache<SystemClock> {
    /// Cache using the system clock.
    pub fn new(settings: &CredentialSettings) -> Self {
        Self::with_clock(settings, SystemClock)
    }
}

impl Default for CredentialCache<SystemClock> {
    fn default() -> Self {
        Self::new(&CredentialSettings::default())
    }
}

impl<C: Clock> CredentialCache<C> {
    /// Cache using a custom clock (useful for testing)
    pub fn with_clock(settings: &CredentialSettings, clock: C) -> Self {
        Self { entries: DashMap::new(), margin: settings.expiry_margin(), clock }
    }

    /// The expiry safety margin.
    pub fn margin(&self) -> Duration {
        self.margin
    }

    fn slot(&self, service_name: &str) -> Slot {
        if let Some(existing) = self.entries.get(service_name) {
            return Arc::clone(existing.value());
        }
        let entry = self.entries.entry(service_name.to_string()).or_default();
        Arc::clone(entry.value())
    }

    fn expired(&self, credential: &CachedCredential, now: Instant) -> bool {
        credential.expires_at.checked_sub(self.margin).map_or(true, |limit| now >= limit)
    }

    /// Whether the service has no usable credential.
    pub fn is_expired(&self, service_name: &str) -> bool {
        let now = self.clock.now();
        match self.entries.get(service_name).map(|slot| Arc::clone(slot.value())) {
            Some(slot) => slot.lock().as_ref().map_or(true, |c| self.expired(c, now)),
            None => true,
        }
    }

    /// Cache `secret` for `expires_in_secs` seconds from now.
    pub fn put<S: Into<Secret>>(&self, service_name: &str, secret: S, expires_in_secs: u64) {
        let issued = IssuedCredential::new(secret, expires_in_secs);
        let slot = self.slot(service_name);
        let mut slot = slot.lock();
        self.store(service_name, &mut slot, issued);
    }

    fn store(&self, service_name: &str, slot: &mut Option<CachedCredential>, issued: IssuedCredential) {
        let now = self.clock.now();
        let mut context = Context::new();
        context.insert("service".into(), json!(service_name));
        context.insert("expires_in_secs".into(), json!(issued.expires_in.as_secs()));
        context.insert("masked".into(), json!(issued.secret.masked()));
        emit(EventLevel::Info, COMPONENT, "credential cached", &context);

        *slot = Some(CachedCredential {
            secret: issued.secret,
            issued_at: now,
            expires_at: expiry_instant(now, issued.expires_in),
        });
    }

    /// The cached credential, if it has not expired.
    pub fn get(&self, service_name: &str) -> Option<Secret> {
        let now = self.clock.now();
        let slot = self.entries.get(service_name).map(|slot| Arc::clone(slot.value()))?;
        let slot = slot.lock();
        slot.as_ref().filter(|c| !self.expired(c, now)).map(|c| c.secret.clone())
    }

    /// Time left before the credential counts as expired.
    pub fn time_to_expiry(&self, service_name: &str) -> Option<Duration> {
        let now = self.clock.now();
        let slot = self.entries.get(service_name).map(|slot| Arc::clone(slot.value()))?;
        let slot = slot.lock();
        slot.as_ref()
            .filter(|c| !self.expired(c, now))
            .map(|c| c.expires_at.saturating_duration_since(now).saturating_sub(self.margin))
    }

    /// Services that currently hold a cached credential, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().lock().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        services.sort();
        services
    }

    /// Drop the credential for one service, or for every service.
    pub fn clear(&self, service_name: Option<&str>) {
        match service_name {
            Some(service) => {
                if let Some(slot) = self.entries.get(service).map(|slot| Arc::clone(slot.value())) {
                    *slot.lock() = None;
                }
            }
            None => {
                for entry in self.entries.iter() {
                    *entry.value().lock() = None;
                }
            }
        }

        let mut context = Context::new();
        context.insert("service".into(), json!(service_name.unwrap_or("*")));
        emit(EventLevel::Info, COMPONENT, "credentials cleared", &context);
    }

    /// Return the cached credential, refreshing it first if it is missing
    /// or expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationFailure`] if the refresh fails or yields an
    /// empty secret or a zero lifetime. Nothing is cached in that case.
    pub fn get_or_refresh<F>(&self, service_name: &str, refresh: F) -> Result<Secret, AuthenticationFailure>
    where
        F: FnOnce() -> Result<IssuedCredential, Failure>,
    {
        let slot = self.slot(service_name);
        let mut slot = slot.lock();

        if let Some(cached) = slot.as_ref() {
            if !self.expired(cached, self.clock.now()) {
                return Ok(cached.secret.clone());
            }
        }

        let mut context = Context::new();
        context.insert("service".into(), json!(service_name));
        emit(EventLevel::Debug, COMPONENT, "refreshing credential", &context);

        let issued = match refresh() {
            Ok(issued) => issued,
            Err(Failure::Authentication(failure)) => return Err(failure),
            Err(other) => {
                return Err(AuthenticationFailure::new(
                    service_name,
                    format!("credential refresh failed: {other}"),
                ))
            }
        };

        if issued.secret.is_empty() || issued.expires_in.is_zero() {
            emit(EventLevel::Warn, COMPONENT, "refresh returned an unusable credential", &context);
            return Err(AuthenticationFailure::new(
                service_name,
                "refresh returned an empty credential or zero lifetime",
            ));
        }

        let secret = issued.secret.clone();
        self.store(service_name, &mut slot, issued);
        Ok(secret)
    }
}

/// Absolute expiry for a lifetime starting at `now`.
///
/// Lifetimes beyond [`MAX_CREDENTIAL_LIFETIME`] are clamped to it. If the
/// platform clock cannot represent the result the credential expires at once.
fn expiry_instant(now: Instant, lifetime: Duration) -> Instant {
    now.checked_add(lifetime.min(MAX_CREDENTIAL_LIFETIME)).unwrap_or(now)
}

/// Run `operation` with the service's credential, refreshing once and
/// retrying once if the operation reports an authentication failure.
///
/// # Errors
///
/// Returns the operation's failure, or the refresh failure wrapped as
/// [`Failure::Authentication`].
pub fn with_credential_refresh<C, T, R, F>(
    cache: &CredentialCache<C>,
    service_name: &str,
    mut refresh: R,
    mut operation: F,
) -> Result<T, Failure>
where
    C: Clock,
    R: FnMut() -> Result<IssuedCredential, Failure>,
    F: FnMut(&Secret) -> Result<T, Failure>,
{
    let secret = cache.get_or_refresh(service_name, &mut refresh)?;
    match operation(&secret) {
        Err(Failure::Authentication(rejected)) => {
            let mut context = Context::new();
            context.insert("service".into(), json!(service_name));
            context.insert("error".into(), json!(rejected.message));
            emit(EventLevel::Warn, COMPONENT, "credential rejected, refreshing once", &context);

            cache.clear(Some(service_name));
            let secret = cache.get_or_refresh(service_name, &mut refresh)?;
            operation(&secret)
        }
        outcome => outcome,
    }
}
