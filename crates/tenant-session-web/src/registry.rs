//! Per-request tenant session registry.
//!
//! A `RequestScope` is created when a request begins and passed to handlers
//! through request extensions. Handlers ask it for a tenant's session; the
//! first call opens one through the factory, later calls in the same request
//! reuse it. The registry itself is only attached once a session is opened.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tenant_session_core::{
    teardown_session, RequestId, ResourceSession, SessionError, SessionFactory, TeardownReport,
    TeardownStage, TenantId,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::lifecycle::LifecycleStats;
use crate::tracker::SessionTracker;

type Registry<S> = HashMap<TenantId, Arc<S>>;

/// Handle on one request's tenant sessions.
pub struct RequestScope<F: SessionFactory> {
    inner: Arc<ScopeInner<F>>,
}

impl<F: SessionFactory> Clone for RequestScope<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ScopeInner<F: SessionFactory> {
    id: RequestId,
    started_at: DateTime<Utc>,
    factory: Arc<F>,
    tracker: Arc<SessionTracker<F::Session>>,
    stats: Arc<LifecycleStats>,
    /// `None` until the first session is opened, and again after completion.
    sessions: Mutex<Option<Registry<F::Session>>>,
    completed: AtomicBool,
}

impl<F: SessionFactory> RequestScope<F> {
    pub(crate) fn new(
        factory: Arc<F>,
        tracker: Arc<SessionTracker<F::Session>>,
        stats: Arc<LifecycleStats>,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: RequestId::from_u128(uuid::Uuid::new_v4().as_u128()),
                started_at: Utc::now(),
                factory,
                tracker,
                stats,
                sessions: Mutex::new(None),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.inner.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Session for `tenant` in this request, opened on first use.
    ///
    /// # Errors
    /// - `SessionError::Closed` if the request already completed, or the
    ///   cached session was force-closed by the error path
    /// - whatever the factory returns when opening fails
    pub async fn session(&self, tenant: &TenantId) -> Result<Arc<F::Session>, SessionError> {
        if self.is_completed() {
            return Err(SessionError::Closed(tenant.to_string()));
        }

        let mut guard = self.inner.sessions.lock().await;
        let registry = guard.get_or_insert_with(HashMap::new);

        if let Some(existing) = registry.get(tenant) {
            if !existing.is_open() {
                return Err(SessionError::Closed(tenant.to_string()));
            }
            return Ok(Arc::clone(existing));
        }

        let session = self.inner.factory.open(tenant).await?;
        debug!(
            "Opened session for tenant {} in request {}",
            tenant, self.inner.id
        );
        registry.insert(tenant.clone(), Arc::clone(&session));
        self.inner
            .tracker
            .track(tenant, self.inner.id, Arc::clone(&session));
        Ok(session)
    }

    /// Whether the registry is attached to this request.
    pub async fn is_attached(&self) -> bool {
        self.inner.sessions.lock().await.is_some()
    }

    /// Number of sessions registered for this request.
    pub async fn len(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .await
            .as_ref()
            .map_or(0, HashMap::len)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Tear down every registered session and detach the registry.
    ///
    /// Runs at most once; later calls return an empty report. Once the
    /// registry is taken, teardown runs on its own task, so dropping the
    /// returned future does not stop it.
    pub(crate) async fn complete(&self) -> TeardownReport {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return TeardownReport::default();
        }

        let sessions = match self.inner.sessions.lock().await.take() {
            Some(sessions) if !sessions.is_empty() => sessions,
            _ => {
                let report = TeardownReport::default();
                self.inner.stats.record_completion(&report);
                return report;
            }
        };

        let id = self.inner.id;
        let tracker = Arc::clone(&self.inner.tracker);
        let stats = Arc::clone(&self.inner.stats);
        let task = tokio::spawn(async move {
            let report = teardown_registry(id, sessions, &tracker).await;
            stats.record_completion(&report);
            report
        });

        match task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Teardown task for request {} failed: {}", id, e);
                TeardownReport::default()
            }
        }
    }
}

impl<F: SessionFactory> Drop for ScopeInner<F> {
    fn drop(&mut self) {
        // Whatever is still here was never handed to a teardown task, either
        // because the request never completed or because completion was
        // cancelled before it took the registry.
        let Some(sessions) = self.sessions.get_mut().take() else {
            return;
        };
        if sessions.is_empty() {
            return;
        }

        warn!(
            "Request {} dropped before completion, tearing down {} session(s)",
            self.id,
            sessions.len()
        );
        let id = self.id;
        let tracker = Arc::clone(&self.tracker);
        let stats = Arc::clone(&self.stats);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let report = teardown_registry(id, sessions, &tracker).await;
                    stats.record_completion(&report);
                });
            }
            Err(_) => {
                // No runtime to run async teardown on; at least stop tracking.
                for tenant in sessions.keys() {
                    tracker.untrack(tenant, id);
                }
            }
        }
    }
}

/// Tear down `sessions` one by one, isolating failures.
///
/// Each entry is untracked first. An entry the tracker no longer holds was
/// drained by `close_all`, which owns its teardown, and is skipped here.
pub(crate) async fn teardown_registry<S: ResourceSession>(
    request_id: RequestId,
    sessions: Registry<S>,
    tracker: &SessionTracker<S>,
) -> TeardownReport {
    let mut report = TeardownReport::default();
    for (tenant, session) in sessions {
        if tracker.untrack(&tenant, request_id).is_none() {
            debug!(
                "Session for tenant {} in request {} already force-closed",
                tenant, request_id
            );
            continue;
        }
        teardown_isolated(&tenant, session.as_ref(), &mut report).await;
    }
    report
}

/// Run the teardown sequence for one session, turning a panic into a report entry.
pub(crate) async fn teardown_isolated<S: ResourceSession>(
    tenant: &TenantId,
    session: &S,
    report: &mut TeardownReport,
) {
    let mut single = TeardownReport::default();
    let outcome = AssertUnwindSafe(teardown_session(session, &mut single))
        .catch_unwind()
        .await;
    if outcome.is_err() {
        single.record(
            tenant,
            TeardownStage::Aborted,
            SessionError::Internal("teardown panicked".to_string()),
        );
    }
    report.merge(single);
}
