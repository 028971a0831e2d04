use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::tenant::TenantId;

/// State of a session's transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction was ever begun, or the last one was resolved and discarded.
    #[default]
    None,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// True while the transaction is begun but neither committed nor rolled back.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// An open connection/transaction scope against one tenant's backing store.
///
/// Implementations use interior mutability: a session is shared between the
/// per-request registry and the process-wide tracker, so every operation
/// takes `&self`.
///
/// Contract expected by the lifecycle:
/// - `close` on a closed session is a no-op
/// - `dispose` is idempotent and implies close
/// - `rollback`/`commit` fail when no transaction is active
#[async_trait]
pub trait ResourceSession: Send + Sync {
    /// Tenant this session belongs to.
    fn tenant(&self) -> &TenantId;

    /// When the session was opened.
    fn opened_at(&self) -> DateTime<Utc>;

    fn is_open(&self) -> bool;

    /// Whether the session still holds a live connection to the store.
    fn is_connected(&self) -> bool;

    fn transaction_state(&self) -> TransactionState;

    async fn begin_transaction(&self) -> Result<(), SessionError>;

    async fn commit(&self) -> Result<(), SessionError>;

    async fn rollback(&self) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;

    /// Release the session's underlying resources.
    async fn dispose(&self) -> Result<(), SessionError>;
}

/// Opens sessions against a tenant's backing store.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: ResourceSession + 'static;

    /// Open a new session for `tenant`.
    ///
    /// # Errors
    /// `SessionError::Open` if the tenant's store cannot be reached.
    async fn open(&self, tenant: &TenantId) -> Result<Arc<Self::Session>, SessionError>;
}
