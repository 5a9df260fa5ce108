//! Planning observers.
//!
//! Observers receive one event per planning step so that proxy decisions can
//! be traced, counted or asserted on in tests. Events fire on the planning
//! thread; implementations must be cheap and must not block.

use std::sync::Arc;
use std::time::Duration;

use crate::key::{MemberKey, ProxyCacheKey};
use crate::marker::InterceptorMarker;
use crate::synthesis::SynthesisStrategy;

/// What planning decided for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Registration returned unchanged without consulting the cache
    Identity,
    /// No member needs interception; registration returned unchanged
    Primitive,
    /// A proxy type was synthesized with the given strategy
    Synthesized(SynthesisStrategy),
}

/// Hooks into proxy planning.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use ferrous_intercept::{PlanObserver, PlanOutcome, ProxyCacheKey};
///
/// #[derive(Default)]
/// struct CountingObserver {
///     synthesized: AtomicUsize,
/// }
///
/// impl PlanObserver for CountingObserver {
///     fn planned(&self, _key: &ProxyCacheKey, outcome: PlanOutcome, _took: Duration) {
///         if let PlanOutcome::Synthesized(_) = outcome {
///             self.synthesized.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait PlanObserver: Send + Sync {
    /// Cache miss: the pair is about to be classified.
    fn planning(&self, _key: &ProxyCacheKey) {}

    /// Planning finished for the pair.
    fn planned(&self, key: &ProxyCacheKey, outcome: PlanOutcome, duration: Duration);

    /// A memoized entry was reused.
    fn cache_hit(&self, _key: &ProxyCacheKey) {}

    /// A gathered marker will not run because it does not fit the member's shape.
    fn inert_marker(&self, _key: &ProxyCacheKey, _member: &MemberKey, _marker: &InterceptorMarker) {}
}

/// Observer forwarding planning events to `tracing`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ferrous_intercept::{LoggingObserver, ProxyPlanner};
///
/// let mut planner = ProxyPlanner::new();
/// planner.add_observer(Arc::new(LoggingObserver::new()));
/// ```
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    prefix: String,
}

impl LoggingObserver {
    /// Logger using the crate name as its prefix.
    pub fn new() -> Self {
        Self {
            prefix: "ferrous-intercept".to_string(),
        }
    }

    /// Logger whose messages start with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanObserver for LoggingObserver {
    fn planning(&self, key: &ProxyCacheKey) {
        tracing::debug!(prefix = %self.prefix, pair = %key, "planning proxy");
    }

    fn planned(&self, key: &ProxyCacheKey, outcome: PlanOutcome, duration: Duration) {
        tracing::info!(
            prefix = %self.prefix,
            pair = %key,
            outcome = ?outcome,
            elapsed_us = duration.as_micros() as u64,
            "proxy planned"
        );
    }

    fn cache_hit(&self, key: &ProxyCacheKey) {
        tracing::debug!(prefix = %self.prefix, pair = %key, "proxy cache hit");
    }

    fn inert_marker(&self, key: &ProxyCacheKey, member: &MemberKey, marker: &InterceptorMarker) {
        tracing::warn!(
            prefix = %self.prefix,
            pair = %key,
            member = %member,
            marker = marker.name(),
            "inert marker"
        );
    }
}

/// Registered observers of one planner.
#[derive(Default, Clone)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn PlanObserver>>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Arc<dyn PlanObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub(crate) fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    #[inline]
    pub(crate) fn planning(&self, key: &ProxyCacheKey) {
        for observer in &self.observers {
            observer.planning(key);
        }
    }

    #[inline]
    pub(crate) fn planned(&self, key: &ProxyCacheKey, outcome: PlanOutcome, duration: Duration) {
        for observer in &self.observers {
            observer.planned(key, outcome, duration);
        }
    }

    #[inline]
    pub(crate) fn cache_hit(&self, key: &ProxyCacheKey) {
        for observer in &self.observers {
            observer.cache_hit(key);
        }
    }

    #[inline]
    pub(crate) fn inert_marker(&self, key: &ProxyCacheKey, member: &MemberKey, marker: &InterceptorMarker) {
        for observer in &self.observers {
            observer.inert_marker(key, member, marker);
        }
    }
}
