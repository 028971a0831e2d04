//! Core traits and types for per-tenant resource session lifecycles.
//!
//! This crate defines the abstractions shared by the lifecycle manager and any backing store:
//! - `ResourceSession`: an open connection/transaction scope against one tenant's store
//! - `SessionFactory`: opens sessions for a tenant
//! - `ErrorLogger`: sink for unhandled request errors
//! - `TeardownReport`: accumulated outcome of tearing sessions down
//! - `UsernameAndPasswordRule`: per-tenant credential and lockout policy

mod error;
mod logger;
mod policy;
mod session;
mod teardown;
mod tenant;

pub use error::SessionError;
pub use logger::{ErrorLogger, TracingErrorLogger};
pub use policy::{PasswordViolation, UsernameAndPasswordRule};
pub use session::{ResourceSession, SessionFactory, TransactionState};
pub use teardown::{teardown_session, TeardownError, TeardownReport, TeardownStage};
pub use tenant::{RequestId, TenantId};
