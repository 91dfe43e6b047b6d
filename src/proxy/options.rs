//! Handler Options
//!
//! Construction-time settings of the caching handler.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::policy::HeuristicPolicy;
use crate::proxy::DispositionObserver;

// == Store Policy ==
/// Extension hook that widens what the handler may store.
///
/// Both checks default to `false`, leaving the built-in rules unchanged.
pub trait StorePolicy: Send + Sync {
    /// Marks a method other than GET/HEAD as cacheable. Such requests are
    /// looked up and stored like GETs and never trigger invalidation.
    fn method_storable(&self, _method: &Method) -> bool {
        false
    }

    /// Marks a status outside the cacheable-by-default set as storable.
    fn status_storable(&self, _status: StatusCode) -> bool {
        false
    }
}

// == Handler Options ==
#[derive(Clone)]
pub struct HandlerOptions {
    /// Shared cache privacy rules; private mode when `false`
    pub shared: bool,
    /// Lifetime for responses without explicit freshness
    pub heuristic: HeuristicPolicy,
    /// How long past expiry a stored entry may stand in for a failed
    /// origin fetch when neither side sends `stale-if-error`
    pub stale_if_error: Duration,
    pub store_policy: Option<Arc<dyn StorePolicy>>,
    pub observer: Option<Arc<dyn DispositionObserver>>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            shared: true,
            heuristic: HeuristicPolicy::default(),
            stale_if_error: Duration::ZERO,
            store_policy: None,
            observer: None,
        }
    }
}

impl HandlerOptions {
    pub fn shared() -> Self {
        Self::default()
    }

    pub fn private() -> Self {
        Self {
            shared: false,
            ..Self::default()
        }
    }

    pub fn with_store_policy(mut self, policy: Arc<dyn StorePolicy>) -> Self {
        self.store_policy = Some(policy);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispositionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_stale_if_error(mut self, tolerance: Duration) -> Self {
        self.stale_if_error = tolerance;
        self
    }

    pub(crate) fn method_storable(&self, method: &Method) -> bool {
        self.store_policy
            .as_ref()
            .is_some_and(|p| p.method_storable(method))
    }

    pub(crate) fn status_storable(&self, status: StatusCode) -> bool {
        self.store_policy
            .as_ref()
            .is_some_and(|p| p.status_storable(status))
    }
}

impl std::fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("shared", &self.shared)
            .field("heuristic", &self.heuristic)
            .field("stale_if_error", &self.stale_if_error)
            .field("store_policy", &self.store_policy.is_some())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
