use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Status of a single task slot within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Whether `self -> next` is one of the allowed one-way transitions.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(ValidationError::UnknownTaskStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Scheduling discipline applied to the tasks of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum StepKind {
    Sequential,
    Parallel,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Sequential => write!(f, "sequential"),
            StepKind::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for StepKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(StepKind::Sequential),
            "parallel" => Ok(StepKind::Parallel),
            other => Err(ValidationError::UnknownStepKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for StepKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One status slot. A step may list the same task name twice; each
/// occurrence gets its own slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSlot {
    pub name: String,
    pub status: TaskStatus,
}

impl TaskSlot {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Pending,
        }
    }
}

/// A step of a run together with the live status of its tasks.
///
/// Serializes to `{"step_idx": 0, "type": "parallel", "tasks": {"a": "pending"}}`,
/// with `tasks` written in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step_idx")]
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(with = "slots")]
    pub tasks: Vec<TaskSlot>,
}

impl Step {
    pub fn new(index: usize, kind: StepKind, task_names: &[String]) -> Self {
        Self {
            index,
            kind,
            tasks: task_names.iter().map(|n| TaskSlot::pending(n)).collect(),
        }
    }

    /// Status of the first slot with the given name.
    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|s| s.name == name).map(|s| s.status)
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|s| s.status.is_terminal())
    }
}

/// The `tasks` object of a persisted step, kept as an ordered list so
/// duplicate names survive a round trip.
mod slots {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::{TaskSlot, TaskStatus};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(slots: &Vec<TaskSlot>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(slots.len()))?;
        for slot in slots {
            map.serialize_entry(&slot.name, &slot.status)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<TaskSlot>, D::Error> {
        deserializer.deserialize_map(SlotVisitor)
    }

    struct SlotVisitor;

    impl<'de> Visitor<'de> for SlotVisitor {
        type Value = Vec<TaskSlot>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object mapping task names to statuses")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut slots = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, status)) = access.next_entry::<String, TaskStatus>()? {
                slots.push(TaskSlot { name, status });
            }
            Ok(slots)
        }
    }
}

/// Address of one task slot inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub step: usize,
    pub slot: usize,
}

/// One submitted workflow and the current status of every task in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    pub run_id: String,
    pub steps: Vec<Step>,
}

impl WorkflowRun {
    /// Build a run with every task `pending`. Specs must already be validated.
    pub fn new(run_id: impl Into<String>, specs: &[StepSpec]) -> Self {
        let steps = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| Step::new(idx, spec.kind, &spec.tasks))
            .collect();
        Self {
            run_id: run_id.into(),
            steps,
        }
    }

    /// Encode the steps as the JSON array stored in the run record.
    pub fn to_json(&self) -> Result<String, ValidationError> {
        Ok(serde_json::to_string(&self.steps)?)
    }

    /// Decode a stored JSON array. Step indices must run 0, 1, 2, ...
    pub fn from_json(run_id: impl Into<String>, raw: &str) -> Result<Self, ValidationError> {
        let steps: Vec<Step> = serde_json::from_str(raw)?;
        for (position, step) in steps.iter().enumerate() {
            if step.index != position {
                return Err(ValidationError::IndexMismatch {
                    position,
                    found: step.index,
                });
            }
        }
        Ok(Self {
            run_id: run_id.into(),
            steps,
        })
    }

    pub fn slot(&self, at: SlotRef) -> Option<&TaskSlot> {
        self.steps.get(at.step)?.tasks.get(at.slot)
    }

    /// Apply a status change if `at` exists and the change is a legal
    /// forward transition. Returns `false` and changes nothing otherwise.
    pub fn transition(&mut self, at: SlotRef, next: TaskStatus) -> bool {
        let Some(slot) = self
            .steps
            .get_mut(at.step)
            .and_then(|s| s.tasks.get_mut(at.slot))
        else {
            return false;
        };
        if !slot.status.can_transition_to(next) {
            return false;
        }
        slot.status = next;
        true
    }

    /// True once every task in every step is `success` or `failed`.
    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(Step::is_complete)
    }
}

/// A step as submitted: a kind and an ordered list of task names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub tasks: Vec<String>,
}

impl StepSpec {
    pub fn new(kind: StepKind, tasks: &[&str]) -> Self {
        Self {
            kind,
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Workflow submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default = "WorkflowRequest::demo_steps")]
    pub steps: Vec<StepSpec>,
}

impl Default for WorkflowRequest {
    fn default() -> Self {
        Self {
            steps: Self::demo_steps(),
        }
    }
}

impl WorkflowRequest {
    /// Used when a submission omits `steps`.
    pub fn demo_steps() -> Vec<StepSpec> {
        vec![
            StepSpec::new(StepKind::Parallel, &["task_a", "task_b"]),
            StepSpec::new(StepKind::Sequential, &["task_a", "task_b", "task_c"]),
        ]
    }

    /// Reject steps without tasks and blank task names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (idx, step) in self.steps.iter().enumerate() {
            if step.tasks.is_empty() {
                return Err(ValidationError::EmptyStep(idx));
            }
            if step.tasks.iter().any(|t| t.trim().is_empty()) {
                return Err(ValidationError::EmptyTaskName { step: idx });
            }
        }
        Ok(())
    }
}
