//! Team task graph
//!
//! Tasks form a dependency DAG through `blocked_by`. Claimability is a
//! pure function of the board; claims happen under the scheduler's
//! state lock, so two members can never take the same task.

use super::member::MemberId;
use chrono::{DateTime, Utc};
use ensemble_foundation::{Error, Result};
use serde::{Deserialize, Serialize};

/// Board-scoped task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// One unit of delegable work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: TaskId,
    pub subject: String,
    pub description: String,
    pub status: TaskStatus,

    /// Member currently working it
    pub owner: Option<MemberId>,

    /// Tasks that must complete before this one can start
    pub blocked_by: Vec<TaskId>,

    /// Completion report from the member that finished it
    pub report: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ordered collection of a team's tasks
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Vec<TeamTask>,
    next_id: u64,
}

impl TaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        subject: impl Into<String>,
        description: impl Into<String>,
        blocked_by: Vec<TaskId>,
    ) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let now = Utc::now();
        self.tasks.push(TeamTask {
            id,
            subject: subject.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            owner: None,
            blocked_by,
            report: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&TeamTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: TaskId) -> Option<&mut TeamTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// A task is claimable when nobody owns it, it is still pending,
    /// and every blocking task has completed.
    pub fn is_claimable(&self, id: TaskId) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };
        task.owner.is_none()
            && task.status == TaskStatus::Pending
            && task.blocked_by.iter().all(|dep| {
                self.get(*dep)
                    .map(|t| t.status == TaskStatus::Completed)
                    // A dangling dependency never unblocks
                    .unwrap_or(false)
            })
    }

    /// First claimable task in creation order
    pub fn find_next_claimable(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .map(|t| t.id)
            .find(|id| self.is_claimable(*id))
    }

    /// Claim a task for a member. Fails if it stopped being claimable.
    pub fn claim(&mut self, id: TaskId, owner: MemberId) -> Result<()> {
        if !self.is_claimable(id) {
            return Err(Error::Task(format!("task {} is not claimable", id)));
        }
        let task = self
            .get_mut(id)
            .ok_or_else(|| Error::Task(format!("unknown task {}", id)))?;
        task.owner = Some(owner);
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Mark a task completed and record the report.
    pub fn complete(&mut self, id: TaskId, report: impl Into<String>) -> Result<()> {
        let task = self
            .get_mut(id)
            .ok_or_else(|| Error::Task(format!("unknown task {}", id)))?;
        task.status = TaskStatus::Completed;
        task.report = Some(report.into());
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Release an in-progress task back to pending (member died or was
    /// stopped before finishing).
    pub fn release(&mut self, id: TaskId) -> Result<()> {
        let task = self
            .get_mut(id)
            .ok_or_else(|| Error::Task(format!("unknown task {}", id)))?;
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Pending;
            task.owner = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn all(&self) -> &[TeamTask] {
        &self.tasks
    }

    pub fn snapshot(&self) -> Vec<TeamTask> {
        self.tasks.clone()
    }

    pub fn all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    pub fn has_claimable(&self) -> bool {
        self.find_next_claimable().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> MemberId {
        MemberId::new()
    }

    #[test]
    fn test_claimability_follows_dependencies() {
        let mut board = TaskBoard::new();
        let a = board.add("a", "independent", vec![]);
        let b = board.add("b", "independent", vec![]);
        let c = board.add("c", "needs both", vec![a, b]);

        assert!(board.is_claimable(a));
        assert!(board.is_claimable(b));
        assert!(!board.is_claimable(c));

        board.claim(a, member()).unwrap();
        board.complete(a, "done").unwrap();
        assert!(!board.is_claimable(c));

        board.claim(b, member()).unwrap();
        board.complete(b, "done").unwrap();
        assert!(board.is_claimable(c));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut board = TaskBoard::new();
        let a = board.add("a", "", vec![]);

        board.claim(a, member()).unwrap();
        assert!(board.claim(a, member()).is_err());
    }

    #[test]
    fn test_find_next_claimable_respects_creation_order() {
        let mut board = TaskBoard::new();
        let a = board.add("a", "", vec![]);
        let b = board.add("b", "", vec![]);

        assert_eq!(board.find_next_claimable(), Some(a));
        board.claim(a, member()).unwrap();
        assert_eq!(board.find_next_claimable(), Some(b));
    }

    #[test]
    fn test_release_returns_task_to_pending() {
        let mut board = TaskBoard::new();
        let a = board.add("a", "", vec![]);

        board.claim(a, member()).unwrap();
        board.release(a).unwrap();

        assert!(board.is_claimable(a));
        assert!(board.get(a).unwrap().owner.is_none());
    }

    #[test]
    fn test_dangling_dependency_never_unblocks() {
        let mut board = TaskBoard::new();
        let a = board.add("a", "", vec![TaskId(999)]);
        assert!(!board.is_claimable(a));
    }
}
