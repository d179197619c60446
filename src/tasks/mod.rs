pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

/// A named unit of work the engine can run.
///
/// `run` may block; the engine always calls it on the blocking pool.
pub trait Task: Send + Sync {
    /// Name used to reference the task from a workflow step.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    fn run(&self) -> Result<()>;
}

/// Lookup table from task name to implementation.
///
/// Built once at startup and handed to the engine; tests build their own.
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Create a registry with the built-in tasks registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a task, replacing any previous task of the same name.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(task.name().to_string(), task);
    }

    /// Look up a task by name. A miss is an ordinary outcome.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    /// All registered tasks with descriptions, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .tasks
            .values()
            .map(|t| (t.name(), t.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Adapter turning a closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    description: String,
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    pub fn new(name: &str, description: &str, body: F) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            body,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn run(&self) -> Result<()> {
        (self.body)()
    }
}
