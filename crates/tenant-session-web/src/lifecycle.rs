//! Per-tenant session lifecycle across a request.
//!
//! `begin_request` hands out a `RequestScope`; `complete_request` resolves,
//! closes and disposes everything that scope opened. `handle_unhandled_error`
//! logs the error, force-closes every tracked session in the process and
//! always yields the error-page redirect.

use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tenant_session_core::{ErrorLogger, SessionFactory, TeardownReport};
use tracing::{info, instrument, warn};

use crate::registry::{teardown_isolated, RequestScope};
use crate::tracker::SessionTracker;

/// Path and marker appended to the error destination base URL.
const ERROR_PATH: &str = "/Error/?gl=1";

/// Counters for failures that are absorbed rather than surfaced to clients.
#[derive(Debug, Default)]
pub struct LifecycleStats {
    completed_requests: AtomicU64,
    sessions_torn_down: AtomicU64,
    rollbacks: AtomicU64,
    swallowed_errors: AtomicU64,
    unhandled_errors: AtomicU64,
}

/// Point-in-time copy of `LifecycleStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub completed_requests: u64,
    pub sessions_torn_down: u64,
    pub rollbacks: u64,
    pub swallowed_errors: u64,
    pub unhandled_errors: u64,
}

impl LifecycleStats {
    pub(crate) fn record_completion(&self, report: &TeardownReport) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
        self.record_teardown(report);
    }

    fn record_teardown(&self, report: &TeardownReport) {
        self.sessions_torn_down
            .fetch_add(report.sessions as u64, Ordering::Relaxed);
        self.rollbacks
            .fetch_add(report.rolled_back as u64, Ordering::Relaxed);
        self.swallowed_errors
            .fetch_add(report.errors.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            sessions_torn_down: self.sessions_torn_down.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            swallowed_errors: self.swallowed_errors.load(Ordering::Relaxed),
            unhandled_errors: self.unhandled_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of handling an unhandled request error.
#[derive(Debug)]
pub struct ErrorRedirect {
    /// Where the client is sent.
    pub location: String,
    /// Whether the error reached the logger.
    pub logged: bool,
    /// Teardown of every session the tracker held.
    pub teardown: TeardownReport,
}

/// Owns the session factory and the process-wide tracker.
pub struct SessionLifecycle<F: SessionFactory> {
    factory: Arc<F>,
    tracker: Arc<SessionTracker<F::Session>>,
    logger: Arc<dyn ErrorLogger>,
    site_url: Option<String>,
    stats: Arc<LifecycleStats>,
}

impl<F: SessionFactory> SessionLifecycle<F> {
    pub fn new(factory: Arc<F>, logger: Arc<dyn ErrorLogger>, site_url: Option<String>) -> Self {
        Self {
            factory,
            tracker: Arc::new(SessionTracker::new()),
            logger,
            site_url: site_url.filter(|url| !url.trim().is_empty()),
            stats: Arc::new(LifecycleStats::default()),
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    pub fn tracker(&self) -> &SessionTracker<F::Session> {
        &self.tracker
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Request-begin hook: a fresh scope with no registry attached.
    pub fn begin_request(&self) -> RequestScope<F> {
        RequestScope::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.tracker),
            Arc::clone(&self.stats),
        )
    }

    /// Completion callback: tear down the scope's sessions and detach its registry.
    ///
    /// Failures are absorbed into the returned report and counted; the
    /// response for the request has already been produced.
    #[instrument(skip_all, fields(request_id = %scope.request_id()))]
    pub async fn complete_request(&self, scope: &RequestScope<F>) -> TeardownReport {
        let report = scope.complete().await;
        if report.sessions > 0 {
            info!(
                "Closed {} session(s), rolled back {}, {} teardown error(s)",
                report.sessions,
                report.rolled_back,
                report.errors.len()
            );
        }
        report
    }

    /// Unhandled-error hook.
    ///
    /// Logging and teardown are best-effort; the redirect location is always
    /// returned. `origin` is the request's `<scheme>://<host>`, used when no
    /// site URL is configured.
    #[instrument(skip_all)]
    pub async fn handle_unhandled_error(
        &self,
        err: &(dyn Error + Send + Sync + 'static),
        origin: Option<&str>,
    ) -> ErrorRedirect {
        self.stats.unhandled_errors.fetch_add(1, Ordering::Relaxed);

        let logged = match catch_unwind(AssertUnwindSafe(|| self.logger.log_error(err))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Failed to log unhandled error: {}", e);
                self.stats.swallowed_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(_) => {
                warn!("Error logger panicked");
                self.stats.swallowed_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        let teardown = self.close_all().await;

        ErrorRedirect {
            location: self.error_destination(origin),
            logged,
            teardown,
        }
    }

    /// Force-close every tracked session of every tenant.
    pub async fn close_all(&self) -> TeardownReport {
        let drained = self.tracker.drain_all();
        if !drained.is_empty() {
            warn!("Force-closing {} tracked session(s)", drained.len());
        }

        let mut report = TeardownReport::default();
        for entry in drained {
            teardown_isolated(&entry.tenant, entry.session.as_ref(), &mut report).await;
        }
        self.stats.record_teardown(&report);
        report
    }

    /// `<baseUrl>/Error/?gl=1`, from the configured site URL or the request origin.
    pub fn error_destination(&self, origin: Option<&str>) -> String {
        let base = match (&self.site_url, origin) {
            (Some(site), _) => site.trim_end_matches('/'),
            (None, Some(origin)) => origin.trim_end_matches('/'),
            _ => "",
        };
        format!("{}{}", base, ERROR_PATH)
    }
}
