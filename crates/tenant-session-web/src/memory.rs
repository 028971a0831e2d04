//! In-memory backing store.
//!
//! Each tenant owns a table of JSON values. Sessions write straight through
//! outside a transaction; inside one, writes are staged and applied on commit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tenant_session_core::{
    ResourceSession, SessionError, SessionFactory, TenantId, TransactionState,
};
use tracing::{debug, instrument};
use uuid::Uuid;

type Table = RwLock<BTreeMap<String, Value>>;

/// Tenant tables shared by every session.
#[derive(Default)]
pub struct MemoryStore {
    tables: DashMap<TenantId, Arc<Table>>,
    unavailable: DashSet<TenantId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for `tenant` until `mark_available` is called.
    pub fn mark_unavailable(&self, tenant: &TenantId) {
        self.unavailable.insert(tenant.clone());
    }

    pub fn mark_available(&self, tenant: &TenantId) {
        self.unavailable.remove(tenant);
    }

    /// Committed value of `key` for `tenant`, bypassing sessions.
    pub fn committed(&self, tenant: &TenantId, key: &str) -> Option<Value> {
        let table = self.tables.get(tenant)?;
        let rows = table.read().unwrap_or_else(PoisonError::into_inner);
        rows.get(key).cloned()
    }

    fn table(&self, tenant: &TenantId) -> Arc<Table> {
        Arc::clone(self.tables.entry(tenant.clone()).or_default().value())
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    type Session = MemorySession;

    #[instrument(skip(self), level = "debug")]
    async fn open(&self, tenant: &TenantId) -> Result<Arc<MemorySession>, SessionError> {
        if self.unavailable.contains(tenant) {
            return Err(SessionError::Open {
                tenant: tenant.to_string(),
                message: "store unavailable".to_string(),
            });
        }
        Ok(Arc::new(MemorySession::new(tenant.clone(), self.table(tenant))))
    }
}

#[derive(Debug)]
struct SessionState {
    open: bool,
    disposed: bool,
    transaction: TransactionState,
    /// Pending writes of the active transaction; `None` marks a delete.
    staged: BTreeMap<String, Option<Value>>,
}

/// A session against one tenant's table.
pub struct MemorySession {
    id: Uuid,
    tenant: TenantId,
    opened_at: DateTime<Utc>,
    table: Arc<Table>,
    state: Mutex<SessionState>,
}

impl MemorySession {
    fn new(tenant: TenantId, table: Arc<Table>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            opened_at: Utc::now(),
            table,
            state: Mutex::new(SessionState {
                open: true,
                disposed: false,
                transaction: TransactionState::None,
                staged: BTreeMap::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock state, failing if the session is closed.
    fn open_state(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.state();
        if !state.open {
            return Err(SessionError::Closed(self.tenant.to_string()));
        }
        Ok(state)
    }

    /// Read `key`, seeing this session's uncommitted writes.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, SessionError> {
        let state = self.open_state()?;
        if state.transaction.is_active() {
            if let Some(staged) = state.staged.get(key) {
                return Ok(staged.clone());
            }
        }
        let rows = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(key).cloned())
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<(), SessionError> {
        let mut state = self.open_state()?;
        if state.transaction.is_active() {
            state.staged.insert(key.to_string(), Some(value));
        } else {
            let mut rows = self.table.write().unwrap_or_else(PoisonError::into_inner);
            rows.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Delete `key`, returning whether it was visible to this session.
    pub async fn delete(&self, key: &str) -> Result<bool, SessionError> {
        let existed = self.get(key).await?.is_some();
        let mut state = self.open_state()?;
        if state.transaction.is_active() {
            state.staged.insert(key.to_string(), None);
        } else {
            let mut rows = self.table.write().unwrap_or_else(PoisonError::into_inner);
            rows.remove(key);
        }
        Ok(existed)
    }

    fn discard(&self, state: &mut SessionState) {
        if state.transaction.is_active() {
            debug!(
                "Discarding {} staged write(s) for tenant {}",
                state.staged.len(),
                self.tenant
            );
            state.transaction = TransactionState::RolledBack;
        }
        state.staged.clear();
    }
}

#[async_trait]
impl ResourceSession for MemorySession {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn is_connected(&self) -> bool {
        let state = self.state();
        state.open && !state.disposed
    }

    fn transaction_state(&self) -> TransactionState {
        self.state().transaction
    }

    async fn begin_transaction(&self) -> Result<(), SessionError> {
        let mut state = self.open_state()?;
        if state.transaction.is_active() {
            return Err(SessionError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        state.transaction = TransactionState::Active;
        state.staged.clear();
        Ok(())
    }

    async fn commit(&self) -> Result<(), SessionError> {
        let mut state = self.open_state()?;
        if !state.transaction.is_active() {
            return Err(SessionError::Transaction(
                "no active transaction to commit".to_string(),
            ));
        }
        let staged = std::mem::take(&mut state.staged);
        {
            let mut rows = self.table.write().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in staged {
                match value {
                    Some(value) => rows.insert(key, value),
                    None => rows.remove(&key),
                };
            }
        }
        state.transaction = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        let mut state = self.open_state()?;
        if !state.transaction.is_active() {
            return Err(SessionError::Transaction(
                "no active transaction to roll back".to_string(),
            ));
        }
        self.discard(&mut state);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state();
        if !state.open {
            return Ok(());
        }
        self.discard(&mut state);
        state.open = false;
        Ok(())
    }

    async fn dispose(&self) -> Result<(), SessionError> {
        let mut state = self.state();
        if state.disposed {
            return Ok(());
        }
        self.discard(&mut state);
        state.open = false;
        state.disposed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tenant(code: &str) -> TenantId {
        TenantId::parse(code).unwrap()
    }

    #[tokio::test]
    async fn test_autocommit_writes_are_visible() {
        let store = MemoryStore::new();
        let session = store.open(&tenant("T1")).await.unwrap();

        session.put("greeting", json!("hello")).await.unwrap();

        assert_eq!(session.get("greeting").await.unwrap(), Some(json!("hello")));
        assert_eq!(store.committed(&tenant("T1"), "greeting"), Some(json!("hello")));
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = MemoryStore::new();
        let t1 = tenant("T1");
        let session = store.open(&t1).await.unwrap();

        session.begin_transaction().await.unwrap();
        session.put("a", json!(1)).await.unwrap();
        assert_eq!(session.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.committed(&t1, "a"), None);

        session.commit().await.unwrap();
        assert_eq!(session.transaction_state(), TransactionState::Committed);
        assert_eq!(store.committed(&t1, "a"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let t1 = tenant("T1");
        let session = store.open(&t1).await.unwrap();
        session.put("a", json!(1)).await.unwrap();

        session.begin_transaction().await.unwrap();
        assert!(session.delete("a").await.unwrap());
        assert_eq!(session.get("a").await.unwrap(), None);
        session.rollback().await.unwrap();

        assert_eq!(session.transaction_state(), TransactionState::RolledBack);
        assert_eq!(store.committed(&t1, "a"), Some(json!(1)));
        assert!(session.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = MemoryStore::new();
        let s1 = store.open(&tenant("T1")).await.unwrap();
        let s2 = store.open(&tenant("T2")).await.unwrap();

        s1.put("k", json!("one")).await.unwrap();

        assert_eq!(s2.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_work_and_dispose_is_idempotent() {
        let store = MemoryStore::new();
        let session = store.open(&tenant("T1")).await.unwrap();
        session.begin_transaction().await.unwrap();

        session.close().await.unwrap();
        assert!(!session.is_open());
        assert!(!session.is_connected());
        assert_eq!(session.transaction_state(), TransactionState::RolledBack);
        assert!(matches!(
            session.get("k").await,
            Err(SessionError::Closed(_))
        ));

        session.close().await.unwrap();
        session.dispose().await.unwrap();
        session.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_tenant_fails_to_open() {
        let store = MemoryStore::new();
        let t1 = tenant("T1");
        store.mark_unavailable(&t1);
        assert!(matches!(
            store.open(&t1).await,
            Err(SessionError::Open { .. })
        ));
        store.mark_available(&t1);
        assert!(store.open(&t1).await.is_ok());
    }
}
