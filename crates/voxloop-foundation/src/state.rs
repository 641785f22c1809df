use crate::error::EngineError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotRunning,
    Running,
}

/// Run/not-running guard with its own lock, independent of any data locks
/// so turn processing never contends with state checks.
#[derive(Clone)]
pub struct RunFlag {
    state: Arc<Mutex<RunState>>,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RunState::NotRunning)),
        }
    }

    /// Transition NotRunning -> Running. Fails without any state change when
    /// the engine is already running.
    pub fn acquire(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if *state == RunState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        tracing::info!("Engine state: NotRunning -> Running");
        *state = RunState::Running;
        Ok(())
    }

    /// Transition Running -> NotRunning. Idempotent.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if *state == RunState::Running {
            tracing::info!("Engine state: Running -> NotRunning");
        }
        *state = RunState::NotRunning;
    }

    pub fn current(&self) -> RunState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.current() == RunState::Running
    }
}
