use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{Task, TaskRegistry};

/// Register every built-in task.
pub fn register_all(registry: &mut TaskRegistry) {
    registry.register(Arc::new(EchoTask::new("task_a", "Running task A")));
    registry.register(Arc::new(EchoTask::new("task_b", "Running task B")));
    registry.register(Arc::new(EchoTask::new("task_c", "Running task C")));
}

/// Logs a fixed message and succeeds.
pub struct EchoTask {
    name: &'static str,
    message: &'static str,
}

impl EchoTask {
    pub const fn new(name: &'static str, message: &'static str) -> Self {
        Self { name, message }
    }
}

impl Task for EchoTask {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Log a message and succeed"
    }

    fn run(&self) -> Result<()> {
        info!(task = self.name, "{}", self.message);
        Ok(())
    }
}
