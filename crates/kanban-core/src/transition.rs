//! Status state machine: target resolution, WIP enforcement and the
//! `started`/`completed` bookkeeping that goes with a move.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::board::Board;
use crate::config::{BoardConfig, ARCHIVED_STATUS};
use crate::error::{KanbanError, Result};
use crate::task::Task;
use crate::validate::require_status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Status(String),
    Next,
    Prev,
}

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub from: String,
    pub to: String,
    pub changed: bool,
    pub warnings: Vec<String>,
}

/// Resolve a move target to a concrete status. `Next`/`Prev` walk the working
/// statuses and never step into the archive sink.
pub fn resolve_target(config: &BoardConfig, current: &str, target: &MoveTarget) -> Result<String> {
    let active = config.active_statuses();
    match target {
        MoveTarget::Status(status) => require_status(config, status),
        MoveTarget::Next => match active.iter().position(|s| s == current) {
            Some(idx) if idx + 1 < active.len() => Ok(active[idx + 1].clone()),
            _ => Err(KanbanError::Boundary {
                id: 0,
                status: current.to_string(),
                edge: "last",
            }),
        },
        MoveTarget::Prev => match active.iter().position(|s| s == current) {
            Some(idx) if idx > 0 => Ok(active[idx - 1].clone()),
            None if current == ARCHIVED_STATUS && !active.is_empty() => {
                Ok(active[active.len() - 1].clone())
            }
            _ => Err(KanbanError::Boundary {
                id: 0,
                status: current.to_string(),
                edge: "first",
            }),
        },
    }
}

/// Column and class-of-service limits for `task` landing in `status`.
/// Returns warnings for limits overridden by `force`.
pub fn check_wip(board: &Board, task: &Task, status: &str, force: bool) -> Result<Vec<String>> {
    let config = &board.config;
    let mut warnings = Vec::new();
    if BoardConfig::is_archived(status) {
        return Ok(warnings);
    }
    let class = config.class(&task.class);
    let bypass = class.map(|c| c.bypass_column_wip).unwrap_or(false);

    if !bypass {
        if let Some(limit) = config.wip_limit(status) {
            let count = board
                .in_status(status)
                .filter(|other| other.id != task.id)
                .filter(|other| {
                    !config
                        .class(&other.class)
                        .map(|c| c.bypass_column_wip)
                        .unwrap_or(false)
                })
                .count() as u32;
            if count >= limit {
                let err = KanbanError::WipLimitExceeded {
                    status: status.to_string(),
                    limit,
                    count,
                };
                if !force {
                    return Err(err);
                }
                warnings.push(format!("{err}; overridden by --force"));
            }
        }
    }

    if let Some(class) = class.filter(|c| c.wip_limit > 0 && !config.is_terminal(status)) {
        let count = board
            .tasks()
            .filter(|other| other.id != task.id && other.class == class.name)
            .filter(|other| !config.is_resolved(&other.status))
            .count() as u32;
        if count >= class.wip_limit {
            let err = KanbanError::ClassWipExceeded {
                class: class.name.clone(),
                limit: class.wip_limit,
                count,
            };
            if !force {
                return Err(err);
            }
            warnings.push(format!("{err}; overridden by --force"));
        }
    }
    Ok(warnings)
}

/// Set `status` and derive timestamps. Archiving leaves timestamps alone.
/// `started` is only filled when leaving the initial status or landing in the
/// terminal one, so `--clear-started` sticks across ordinary moves.
pub fn apply_status(config: &BoardConfig, task: &mut Task, status: &str, now: DateTime<Utc>) {
    let previous = std::mem::replace(&mut task.status, status.to_string());
    if BoardConfig::is_archived(status) {
        return;
    }
    if config.is_terminal(status) {
        if !config.is_terminal(&previous) {
            task.completed = Some(now);
        }
        task.started.get_or_insert(now);
        return;
    }
    if previous == config.initial_status() && status != previous {
        task.started.get_or_insert(now);
    }
    task.completed = None;
}

/// Compute the moved task without touching the board. `changed == false`
/// means the task already sits in the target status and nothing was altered.
pub fn plan_move(
    board: &Board,
    task: &Task,
    target: &MoveTarget,
    force: bool,
    now: DateTime<Utc>,
) -> Result<(Task, MoveOutcome)> {
    let to = resolve_target(&board.config, &task.status, target).map_err(|err| match err {
        KanbanError::Boundary { status, edge, .. } => KanbanError::Boundary {
            id: task.id,
            status,
            edge,
        },
        other => other,
    })?;
    let mut outcome = MoveOutcome {
        from: task.status.clone(),
        to: to.clone(),
        changed: false,
        warnings: Vec::new(),
    };
    if to == task.status {
        return Ok((task.clone(), outcome));
    }
    outcome.warnings = check_wip(board, task, &to, force)?;
    if task.blocked {
        let reason = if task.block_reason.is_empty() {
            String::new()
        } else {
            format!(" ({})", task.block_reason)
        };
        outcome
            .warnings
            .push(format!("task #{} is blocked{reason}; moved anyway", task.id));
    }
    let mut moved = task.clone();
    apply_status(&board.config, &mut moved, &to, now);
    moved.updated = now;
    outcome.changed = true;
    debug!(id = task.id, from = %outcome.from, to = %outcome.to, "planned move");
    Ok((moved, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn task(id: u32, status: &str, class: &str) -> Task {
        let mut task = Task::new(id, "t", now() - Duration::days(1));
        task.status = status.to_string();
        task.priority = "medium".to_string();
        task.class = class.to_string();
        task
    }

    fn board_with(tasks: Vec<Task>, limit: u32) -> Board {
        let mut config = BoardConfig::default();
        config.wip_limits.insert("in-progress".to_string(), limit);
        Board::new(config, tasks)
    }

    #[test]
    fn next_and_prev_stop_at_working_edges() {
        let config = BoardConfig::default();
        assert_eq!(resolve_target(&config, "backlog", &MoveTarget::Next).unwrap(), "todo");
        assert_eq!(resolve_target(&config, "done", &MoveTarget::Prev).unwrap(), "review");
        assert_eq!(
            resolve_target(&config, "done", &MoveTarget::Next).unwrap_err().code(),
            "BOUNDARY_ERROR"
        );
        assert_eq!(
            resolve_target(&config, "backlog", &MoveTarget::Prev).unwrap_err().code(),
            "BOUNDARY_ERROR"
        );
        assert_eq!(resolve_target(&config, "archived", &MoveTarget::Prev).unwrap(), "done");
    }

    #[test]
    fn column_limit_blocks_unless_forced() {
        let board = board_with(
            vec![task(1, "in-progress", "standard"), task(2, "todo", "standard")],
            1,
        );
        let subject = board.get(2).unwrap();
        let err = check_wip(&board, subject, "in-progress", false).unwrap_err();
        assert_eq!(err.code(), "WIP_LIMIT_EXCEEDED");
        let warnings = check_wip(&board, subject, "in-progress", true).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("--force"));
    }

    #[test]
    fn expedite_bypasses_column_but_not_class_limit() {
        let board = board_with(
            vec![
                task(1, "in-progress", "standard"),
                task(2, "todo", "expedite"),
                task(3, "review", "expedite"),
            ],
            1,
        );
        let err = check_wip(&board, board.get(2).unwrap(), "in-progress", false).unwrap_err();
        assert_eq!(err.code(), "CLASS_WIP_EXCEEDED");

        let board = board_with(
            vec![task(1, "in-progress", "standard"), task(2, "todo", "expedite")],
            1,
        );
        assert!(check_wip(&board, board.get(2).unwrap(), "in-progress", false)
            .unwrap()
            .is_empty());
        // the expedite task in the column does not count against standard work
        let board = board_with(
            vec![task(1, "in-progress", "expedite"), task(2, "todo", "standard")],
            1,
        );
        assert!(check_wip(&board, board.get(2).unwrap(), "in-progress", false).is_ok());
    }

    #[test]
    fn terminal_column_limit_applies_but_archive_does_not() {
        let mut config = BoardConfig::default();
        config.wip_limits.insert("done".to_string(), 1);
        config.wip_limits.insert("archived".to_string(), 1);
        let board = Board::new(
            config,
            vec![task(1, "done", ""), task(2, "review", ""), task(3, "archived", "")],
        );
        let err = check_wip(&board, board.get(2).unwrap(), "done", false).unwrap_err();
        assert_eq!(err.code(), "WIP_LIMIT_EXCEEDED");
        let warnings = check_wip(&board, board.get(2).unwrap(), "done", true).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(check_wip(&board, board.get(2).unwrap(), "archived", false).is_ok());
    }

    #[test]
    fn cleared_started_survives_later_moves() {
        let board = board_with(vec![task(1, "todo", "standard")], 0);
        let mut t0 = board.get(1).unwrap().clone();
        t0.started = None;

        let (t1, _) = plan_move(&board, &t0, &MoveTarget::Status("review".into()), false, now()).unwrap();
        assert_eq!(t1.started, None);

        let (t2, _) = plan_move(&board, &t1, &MoveTarget::Status("done".into()), false, now()).unwrap();
        assert_eq!(t2.started, Some(now()));
        assert_eq!(t2.completed, Some(now()));
    }

    #[test]
    fn restoring_from_archive_to_terminal_restamps_completed() {
        let board = board_with(vec![], 0);
        let mut t = task(1, "archived", "standard");
        t.started = Some(now() - Duration::days(9));
        t.completed = Some(now() - Duration::days(8));
        let (restored, _) = plan_move(&board, &t, &MoveTarget::Status("done".into()), false, now()).unwrap();
        assert_eq!(restored.completed, Some(now()));
        assert_eq!(restored.started, Some(now() - Duration::days(9)));
    }

    #[test]
    fn timestamps_follow_the_walk() {
        let board = board_with(vec![task(1, "backlog", "standard")], 0);
        let t0 = board.get(1).unwrap().clone();

        let (t1, out) = plan_move(&board, &t0, &MoveTarget::Status("todo".into()), false, now()).unwrap();
        assert!(out.changed);
        assert_eq!(t1.started, Some(now()));
        assert_eq!(t1.completed, None);

        let later = now() + Duration::hours(2);
        let (t2, _) = plan_move(&board, &t1, &MoveTarget::Status("done".into()), false, later).unwrap();
        assert_eq!(t2.started, Some(now()));
        assert_eq!(t2.completed, Some(later));

        let (t3, _) = plan_move(&board, &t2, &MoveTarget::Prev, false, later).unwrap();
        assert_eq!(t3.status, "review");
        assert_eq!(t3.completed, None);
        assert_eq!(t3.started, Some(now()));

        let (t4, _) = plan_move(&board, &t2, &MoveTarget::Status("archived".into()), false, later).unwrap();
        assert_eq!(t4.completed, Some(later));

        let (same, out) = plan_move(&board, &t3, &MoveTarget::Status("review".into()), false, later).unwrap();
        assert!(!out.changed);
        assert_eq!(same, t3);
    }

    #[test]
    fn blocked_tasks_move_with_warning() {
        let mut blocked = task(1, "todo", "");
        blocked.blocked = true;
        blocked.block_reason = "vendor".to_string();
        let board = board_with(vec![blocked.clone()], 0);
        let (_, out) = plan_move(&board, &blocked, &MoveTarget::Next, false, now()).unwrap();
        assert!(out.warnings[0].contains("blocked (vendor)"));
    }
}
