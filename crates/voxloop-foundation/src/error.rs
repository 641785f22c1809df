use std::fmt;
use thiserror::Error;

/// Errors raised by collaborator operations (devices and network clients).
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("device error: {0}")]
    Device(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CollaboratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CollaboratorError::Cancelled)
    }
}

/// Errors at the engine boundary.
///
/// Mid-turn stream failures are contained within their turn and surface only
/// through logging; the variants here are the ones that cross the engine API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("initialization failed: {0}")]
    Init(#[source] CollaboratorError),

    #[error("stream failure: {0}")]
    Stream(#[source] CollaboratorError),

    #[error("engine cancelled")]
    Cancelled,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("shutdown failures: {0}")]
    Shutdown(ShutdownError),
}

/// Aggregate of failures collected while closing owned collaborators.
///
/// Every close failure is kept, none are suppressed by a later one.
#[derive(Debug, Default)]
pub struct ShutdownError {
    pub failures: Vec<(&'static str, CollaboratorError)>,
}

impl ShutdownError {
    pub fn push(&mut self, component: &'static str, err: CollaboratorError) {
        self.failures.push((component, err));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Shutdown(self))
        }
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (component, err) in &self.failures {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "failed to close {}: {}", component, err)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_error_keeps_every_failure() {
        let mut agg = ShutdownError::default();
        agg.push("recognizer", CollaboratorError::Transport("reset".into()));
        agg.push("synthesizer", CollaboratorError::Provider("quota".into()));

        let msg = agg.to_string();
        assert!(msg.contains("recognizer"));
        assert!(msg.contains("synthesizer"));
        assert!(matches!(
            agg.into_result(),
            Err(EngineError::Shutdown(e)) if e.failures.len() == 2
        ));
    }

    #[test]
    fn empty_shutdown_is_ok() {
        assert!(ShutdownError::default().into_result().is_ok());
    }
}
