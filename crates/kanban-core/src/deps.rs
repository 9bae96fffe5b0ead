use crate::board::Board;
use crate::error::{KanbanError, Result};

/// Check a dependency list for `subject` (0 while the task is being created).
pub fn validate_dependencies(board: &Board, subject: u32, deps: &[u32]) -> Result<()> {
    for dep in deps {
        if subject != 0 && *dep == subject {
            return Err(KanbanError::SelfReference {
                id: subject,
                field: "dependency",
            });
        }
        if !board.contains(*dep) {
            return Err(KanbanError::DependencyNotFound(*dep));
        }
    }
    Ok(())
}

pub fn validate_parent(board: &Board, subject: u32, parent: u32) -> Result<()> {
    if subject != 0 && parent == subject {
        return Err(KanbanError::SelfReference {
            id: subject,
            field: "parent",
        });
    }
    board.require(parent)?;
    Ok(())
}

/// Warning text for archiving a task other tasks still depend on.
pub fn dependents_warning(board: &Board, id: u32) -> Option<String> {
    let dependents: Vec<u32> = board
        .dependents(id)
        .into_iter()
        .filter(|dep| {
            board
                .get(*dep)
                .map(|t| !board.config.is_resolved(&t.status))
                .unwrap_or(false)
        })
        .collect();
    if dependents.is_empty() {
        return None;
    }
    let list = dependents
        .iter()
        .map(|d| format!("#{d}"))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "task #{id} is a dependency of {list}; they now treat it as satisfied"
    ))
}
