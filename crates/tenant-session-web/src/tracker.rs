//! Process-wide tenant session tracker.
//!
//! Every session opened by any in-flight request is tracked here, keyed by
//! tenant and then by request. The error path drains the whole tracker;
//! ordinary completion only removes its own `(tenant, request)` entries, so
//! two requests holding a session for the same tenant never touch each other.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tenant_session_core::{RequestId, TenantId};

/// A drained tracker entry.
pub struct TrackedSession<S> {
    pub tenant: TenantId,
    pub request_id: RequestId,
    pub session: Arc<S>,
}

/// Concurrent `tenant -> request -> session` map shared across requests.
pub struct SessionTracker<S> {
    sessions: DashMap<TenantId, HashMap<RequestId, Arc<S>>>,
}

impl<S> Default for SessionTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionTracker<S> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn track(&self, tenant: &TenantId, request_id: RequestId, session: Arc<S>) {
        self.sessions
            .entry(tenant.clone())
            .or_default()
            .insert(request_id, session);
    }

    /// Remove the session `request_id` holds for `tenant`, if still tracked.
    pub fn untrack(&self, tenant: &TenantId, request_id: RequestId) -> Option<Arc<S>> {
        let removed = {
            let mut entry = self.sessions.get_mut(tenant)?;
            entry.remove(&request_id)
        };
        self.sessions.remove_if(tenant, |_, by_request| by_request.is_empty());
        removed
    }

    /// All sessions currently open for `tenant`, across requests.
    pub fn sessions_for(&self, tenant: &TenantId) -> Vec<Arc<S>> {
        self.sessions
            .get(tenant)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stop tracking every session of `tenant` and hand them back.
    pub fn drain_tenant(&self, tenant: &TenantId) -> Vec<TrackedSession<S>> {
        match self.sessions.remove(tenant) {
            Some((tenant, by_request)) => by_request
                .into_iter()
                .map(|(request_id, session)| TrackedSession {
                    tenant: tenant.clone(),
                    request_id,
                    session,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Stop tracking every session of every tenant and hand them back.
    pub fn drain_all(&self) -> Vec<TrackedSession<S>> {
        let tenants: Vec<TenantId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tenants
            .iter()
            .flat_map(|tenant| self.drain_tenant(tenant))
            .collect()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn tenant_count(&self) -> usize {
        self.sessions.len()
    }
}
