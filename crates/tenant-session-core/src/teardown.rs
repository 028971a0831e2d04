use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::ResourceSession;
use crate::tenant::TenantId;

/// Step of the resolve-transaction, close, dispose sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    Rollback,
    Close,
    Dispose,
    /// The sequence did not run to completion.
    Aborted,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rollback => "rollback",
            Self::Close => "close",
            Self::Dispose => "dispose",
            Self::Aborted => "teardown",
        };
        f.write_str(name)
    }
}

/// One failed teardown step.
#[derive(Debug, Error)]
#[error("{stage} failed for tenant {tenant}: {source}")]
pub struct TeardownError {
    pub tenant: TenantId,
    pub stage: TeardownStage,
    #[source]
    pub source: SessionError,
}

/// Outcome of tearing down one or more sessions.
///
/// Failures never abort the remaining steps; they are collected here.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Sessions the sequence ran for, failed or not.
    pub sessions: usize,
    /// Transactions that were left active and rolled back.
    pub rolled_back: usize,
    pub errors: Vec<TeardownError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: TeardownReport) {
        self.sessions += other.sessions;
        self.rolled_back += other.rolled_back;
        self.errors.extend(other.errors);
    }

    /// Log and keep a failed step.
    pub fn record(&mut self, tenant: &TenantId, stage: TeardownStage, source: SessionError) {
        warn!("Teardown {} failed for tenant {}: {}", stage, tenant, source);
        self.errors.push(TeardownError {
            tenant: tenant.clone(),
            stage,
            source,
        });
    }
}

/// Resolve, close and dispose one session, recording failures into `report`.
///
/// An active transaction on an open session is always rolled back, never
/// committed, whether or not the session still reports itself connected; a
/// rollback on a dropped connection fails and is recorded like any other
/// step. A session that is already closed skips rollback and close but is
/// still disposed.
pub async fn teardown_session<S>(session: &S, report: &mut TeardownReport)
where
    S: ResourceSession + ?Sized,
{
    let tenant = session.tenant().clone();
    report.sessions += 1;

    if session.is_open() && session.transaction_state().is_active() {
        debug!("Rolling back uncommitted transaction for tenant {}", tenant);
        match session.rollback().await {
            Ok(()) => report.rolled_back += 1,
            Err(e) => report.record(&tenant, TeardownStage::Rollback, e),
        }
    }

    if session.is_open() {
        if let Err(e) = session.close().await {
            report.record(&tenant, TeardownStage::Close, e);
        }
    }

    if let Err(e) = session.dispose().await {
        report.record(&tenant, TeardownStage::Dispose, e);
    }
}
