use std::error::Error;

use tracing::error;

use crate::error::SessionError;

/// Sink for errors that escaped request handling.
pub trait ErrorLogger: Send + Sync {
    /// Record `err`. Callers treat a failure here as best-effort and carry on.
    fn log_error(&self, err: &(dyn Error + 'static)) -> Result<(), SessionError>;
}

/// Logs unhandled errors, with their source chain, through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLogger;

impl ErrorLogger for TracingErrorLogger {
    fn log_error(&self, err: &(dyn Error + 'static)) -> Result<(), SessionError> {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        error!(causes = ?chain, "Unhandled request error: {}", err);
        Ok(())
    }
}
