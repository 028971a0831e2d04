//! Fault-injecting session factory for lifecycle tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenant_session_core::{
    ErrorLogger, ResourceSession, SessionError, SessionFactory, TenantId, TransactionState,
};

/// How sessions opened for a tenant misbehave during teardown.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub fail_rollback: bool,
    pub fail_close: bool,
    pub panic_on_dispose: bool,
    /// Sleep this long inside `close`.
    pub close_delay: Option<Duration>,
}

pub struct FlakySession {
    tenant: TenantId,
    opened_at: DateTime<Utc>,
    faults: Faults,
    open: AtomicBool,
    disposed: AtomicBool,
    transaction: Mutex<TransactionState>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FlakySession {
    fn log(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceSession for FlakySession {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.is_open()
    }

    fn transaction_state(&self) -> TransactionState {
        *self.transaction.lock().unwrap()
    }

    async fn begin_transaction(&self) -> Result<(), SessionError> {
        self.log("begin");
        *self.transaction.lock().unwrap() = TransactionState::Active;
        Ok(())
    }

    async fn commit(&self) -> Result<(), SessionError> {
        self.log("commit");
        *self.transaction.lock().unwrap() = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        self.log("rollback");
        if self.faults.fail_rollback {
            return Err(SessionError::Transaction("rollback refused".to_string()));
        }
        *self.transaction.lock().unwrap() = TransactionState::RolledBack;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.log("close");
        if let Some(delay) = self.faults.close_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_close {
            return Err(SessionError::Close("connection stuck".to_string()));
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), SessionError> {
        self.log("dispose");
        if self.faults.panic_on_dispose {
            panic!("dispose blew up");
        }
        self.open.store(false, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens `FlakySession`s, applying the faults registered for each tenant.
#[derive(Default)]
pub struct FlakyFactory {
    faults: Mutex<Vec<(TenantId, Faults)>>,
    pub opened: Mutex<Vec<Arc<FlakySession>>>,
}

impl FlakyFactory {
    pub fn with_faults(self, tenant: &str, faults: Faults) -> Self {
        self.faults
            .lock()
            .unwrap()
            .push((TenantId::parse(tenant).unwrap(), faults));
        self
    }
}

#[async_trait]
impl SessionFactory for FlakyFactory {
    type Session = FlakySession;

    async fn open(&self, tenant: &TenantId) -> Result<Arc<FlakySession>, SessionError> {
        let faults = self
            .faults
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == tenant)
            .map(|(_, f)| *f)
            .unwrap_or_default();
        let session = Arc::new(FlakySession {
            tenant: tenant.clone(),
            opened_at: Utc::now(),
            faults,
            open: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            transaction: Mutex::new(TransactionState::None),
            calls: Mutex::new(Vec::new()),
        });
        self.opened.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Logger that always fails.
pub struct BrokenLogger;

impl ErrorLogger for BrokenLogger {
    fn log_error(&self, _err: &(dyn std::error::Error + 'static)) -> Result<(), SessionError> {
        Err(SessionError::Logging("log sink offline".to_string()))
    }
}

/// Logger that panics.
pub struct PanickingLogger;

impl ErrorLogger for PanickingLogger {
    fn log_error(&self, _err: &(dyn std::error::Error + 'static)) -> Result<(), SessionError> {
        panic!("logger exploded")
    }
}

/// Logger that counts what it was given.
#[derive(Default)]
pub struct RecordingLogger {
    pub messages: Mutex<Vec<String>>,
}

impl ErrorLogger for RecordingLogger {
    fn log_error(&self, err: &(dyn std::error::Error + 'static)) -> Result<(), SessionError> {
        self.messages.lock().unwrap().push(err.to_string());
        Ok(())
    }
}

pub fn tenant(code: &str) -> TenantId {
    TenantId::parse(code).unwrap()
}
