//! In-memory task graph built from one loaded snapshot.

use std::collections::BTreeMap;

use crate::config::BoardConfig;
use crate::error::{KanbanError, Result};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Board {
    pub config: BoardConfig,
    tasks: BTreeMap<u32, Task>,
}

impl Board {
    /// Build the model. Later tasks with an id already present are dropped, so
    /// callers run repair first when duplicates are possible.
    pub fn new(config: BoardConfig, tasks: Vec<Task>) -> Self {
        let mut map = BTreeMap::new();
        for task in tasks {
            map.entry(task.id).or_insert(task);
        }
        Self { config, tasks: map }
    }

    pub fn get(&self, id: u32) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn require(&self, id: u32) -> Result<&Task> {
        self.tasks.get(&id).ok_or(KanbanError::TaskNotFound(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn max_id(&self) -> u32 {
        self.tasks.keys().next_back().copied().unwrap_or(0)
    }

    /// Replace or insert a task after it has been persisted.
    pub fn upsert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn in_status<'a>(&'a self, status: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.values().filter(move |t| t.status == status)
    }

    pub fn children(&self, parent: u32) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|t| t.parent == Some(parent))
            .map(|t| t.id)
            .collect()
    }

    /// Tasks whose `depends_on` names `id`.
    pub fn dependents(&self, id: u32) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|t| t.depends_on.contains(&id))
            .map(|t| t.id)
            .collect()
    }

    /// Dependencies that still hold `task` up. Missing ids count as satisfied.
    pub fn open_dependencies(&self, task: &Task) -> Vec<u32> {
        task.depends_on
            .iter()
            .copied()
            .filter(|dep| {
                self.tasks
                    .get(dep)
                    .map(|d| !self.config.is_resolved(&d.status))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn is_unblocked(&self, task: &Task) -> bool {
        self.open_dependencies(task).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn task(id: u32, status: &str) -> Task {
        let mut task = Task::new(id, &format!("Task {id}"), Utc::now());
        task.status = status.to_string();
        task.priority = "medium".to_string();
        task
    }

    #[test]
    fn indices_follow_the_snapshot() {
        let now = Utc::now();
        let mut a = task(1, "todo");
        let mut b = task(2, "todo");
        b.parent = Some(1);
        b.depends_on = vec![1, 9];
        let mut c = task(3, "done");
        c.claimed_by = Some("bot".to_string());
        c.claimed_at = Some(now - Duration::minutes(5));
        a.claimed_by = Some("old".to_string());
        a.claimed_at = Some(now - Duration::hours(3));
        let board = Board::new(BoardConfig::default(), vec![a, b, c]);

        let todo: Vec<u32> = board.in_status("todo").map(|t| t.id).collect();
        assert_eq!(todo, vec![1, 2]);
        assert_eq!(board.children(1), vec![2]);
        assert_eq!(board.dependents(1), vec![2]);
        let timeout = board.config.claim_timeout();
        let claimed: Vec<u32> = board
            .tasks()
            .filter(|t| crate::claim::is_active_claim(t, now, timeout))
            .map(|t| t.id)
            .collect();
        assert_eq!(claimed, vec![3]);
        assert_eq!(board.max_id(), 3);
    }

    #[test]
    fn missing_and_resolved_dependencies_do_not_block() {
        let mut dep = task(1, "in-progress");
        let mut waiting = task(2, "todo");
        waiting.depends_on = vec![1, 42];
        let board = Board::new(BoardConfig::default(), vec![dep.clone(), waiting.clone()]);
        assert_eq!(board.open_dependencies(&waiting), vec![1]);

        dep.status = "archived".to_string();
        let board = Board::new(BoardConfig::default(), vec![dep, waiting.clone()]);
        assert!(board.is_unblocked(&waiting));
    }
}
