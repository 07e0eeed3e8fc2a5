//! Board document model and its mutation helpers.
//!
//! ```text
//! Board
//!  ├── tasks:       [ Task { id, status, comments[], ..fields } ]
//!  └── teamMembers: [ TeamMember { name, ..fields } ]
//! ```
//!
//! Only the fields the hub needs for lookups are typed (`id`, `status`,
//! `comments`, `name`). Everything else a client attaches is carried
//! verbatim in a flattened JSON map.
//!
//! The helpers here mutate a `Board` value in place and never persist.
//! Callers obtain a board from the store, mutate it, and hand it back
//! through `replace` (see [`crate::store`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller-assigned task identifier.
///
/// Opaque to the hub: any JSON value is accepted and compared by value,
/// so `"7"` and `7` are different ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Value);

impl TaskId {
    pub fn new(id: impl Into<Value>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// Board column a task sits in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskStatus(pub String);

impl TaskStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A comment attached to a task. Identity is its position in the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Comment(pub Value);

const STATUS_FIELD: &str = "status";

/// One unit of work on the board.
///
/// `status` lives in `fields` with everything else the client sent, so it
/// round-trips exactly as received (absent, `null` or a column name).
/// A task without `comments` is stored with an empty list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Caller-defined fields (status, title, assignee, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: TaskId::new(id),
            comments: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.set_status(TaskStatus::new(status));
        self
    }

    /// Current column, if the task has a string status.
    pub fn status(&self) -> Option<&str> {
        self.fields.get(STATUS_FIELD).and_then(Value::as_str)
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.fields.insert(STATUS_FIELD.to_string(), Value::String(status.0));
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A collaborator, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TeamMember {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// The shared board document.
///
/// Serialized as `{ "tasks": [...], "teamMembers": [...] }`, both on the
/// wire (`INIT`) and in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub team_members: Vec<TeamMember>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task(id).is_some()
    }

    pub fn team_member(&self, name: &str) -> Option<&TeamMember> {
        self.team_members.iter().find(|m| m.name == name)
    }

    /// Append a task. Returns `false` (and leaves the board untouched)
    /// when a task with the same id already exists.
    pub fn add_task(&mut self, task: Task) -> bool {
        if self.contains_task(&task.id) {
            return false;
        }
        self.tasks.push(task);
        true
    }

    /// Replace the task with the same id wholesale, keeping its position.
    /// Returns `false` if no such task exists.
    pub fn update_task(&mut self, task: Task) -> bool {
        match self.task_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Remove every task with the given id. Returns how many were removed.
    pub fn delete_task(&mut self, id: &TaskId) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| &t.id != id);
        before - self.tasks.len()
    }

    /// Set the status of a task, leaving every other field as it was.
    pub fn move_task(&mut self, id: &TaskId, status: TaskStatus) -> bool {
        match self.task_mut(id) {
            Some(task) => {
                task.set_status(status);
                true
            }
            None => false,
        }
    }

    /// Append a comment to a task's comment sequence.
    pub fn add_comment(&mut self, task_id: &TaskId, comment: Comment) -> bool {
        match self.task_mut(task_id) {
            Some(task) => {
                task.comments.push(comment);
                true
            }
            None => false,
        }
    }

    /// Insert or replace a team member by name.
    pub fn upsert_team_member(&mut self, member: TeamMember) {
        match self.team_members.iter_mut().find(|m| m.name == member.name) {
            Some(slot) => *slot = member,
            None => self.team_members.push(member),
        }
    }
}
