use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

pub const REASON_TURN_LIMIT: &str = "turn-limit-exceeded";
pub const REASON_CANCELLED: &str = "cancelled";
pub const REASON_ABANDONED: &str = "abandoned";

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_iterations: usize,
    pub model_timeout: Duration,
    /// Checked between iterations; in-flight calls run out their own
    /// timeouts first.
    pub cancel: Arc<AtomicBool>,
}

impl AgentOptions {
    pub fn new(max_iterations: usize, model_timeout: Duration) -> Self {
        Self {
            max_iterations,
            model_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub reason: Option<String>,
    pub iterations: usize,
    pub summary: Option<String>,
}

impl AgentOutcome {
    pub(crate) fn failed(reason: &str, iterations: usize) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            iterations,
            summary: None,
        }
    }
}
