use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use thiserror::Error;

pub type Result<T, E = KanbanError> = std::result::Result<T, E>;

/// Structured failures surfaced to the command layer.
///
/// Every variant maps onto a stable string code (see [`KanbanError::code`]) that
/// scripts and agents can match on regardless of the human message.
#[derive(Debug, Error)]
pub enum KanbanError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid status {status:?}; valid statuses: {}", .allowed.join(", "))]
    InvalidStatus { status: String, allowed: Vec<String> },
    #[error("invalid date {value:?}: {reason}")]
    InvalidDate { value: String, reason: String },
    #[error("invalid task id {0:?}")]
    InvalidTaskId(String),
    #[error("invalid group-by field {field:?}; valid fields: {}", .allowed.join(", "))]
    InvalidGroupBy {
        field: String,
        allowed: Vec<String>,
    },
    #[error("task #{0} not found")]
    TaskNotFound(u32),
    #[error("no changes specified")]
    NoChanges,
    #[error("task #{id} is already at the {edge} status ({status})")]
    Boundary {
        id: u32,
        status: String,
        edge: &'static str,
    },
    #[error("WIP limit reached for {status:?} ({count}/{limit})")]
    WipLimitExceeded {
        status: String,
        limit: u32,
        count: u32,
    },
    #[error("class {class:?} WIP limit reached ({count}/{limit})")]
    ClassWipExceeded { class: String, limit: u32, count: u32 },
    #[error("task #{id} cannot reference itself as {field}")]
    SelfReference { id: u32, field: &'static str },
    #[error("dependency #{0} not found")]
    DependencyNotFound(u32),
    #[error("conflicting options: {0}")]
    StatusConflict(String),
    #[error("{0} requires --yes")]
    ConfirmationRequired(String),
    #[error("task #{id} is claimed by {claimed_by} (since {claimed_at})")]
    TaskClaimed {
        id: u32,
        claimed_by: String,
        claimed_at: String,
    },
    #[error("{0} requires --claim <agent>")]
    ClaimRequired(String),
    #[error("no task matches the pick criteria")]
    NothingToPick,
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}{}: {message}", .path.display(), .line.map(|l| format!(":{l}")).unwrap_or_default())]
    Parse {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },
}

impl KanbanError {
    pub fn code(&self) -> &'static str {
        match self {
            KanbanError::InvalidInput(_) => "INVALID_INPUT",
            KanbanError::InvalidStatus { .. } => "INVALID_STATUS",
            KanbanError::InvalidDate { .. } => "INVALID_DATE",
            KanbanError::InvalidTaskId(_) => "INVALID_TASK_ID",
            KanbanError::InvalidGroupBy { .. } => "INVALID_GROUP_BY",
            KanbanError::TaskNotFound(_) => "TASK_NOT_FOUND",
            KanbanError::NoChanges => "NO_CHANGES",
            KanbanError::Boundary { .. } => "BOUNDARY_ERROR",
            KanbanError::WipLimitExceeded { .. } => "WIP_LIMIT_EXCEEDED",
            KanbanError::ClassWipExceeded { .. } => "CLASS_WIP_EXCEEDED",
            KanbanError::SelfReference { .. } => "SELF_REFERENCE",
            KanbanError::DependencyNotFound(_) => "DEPENDENCY_NOT_FOUND",
            KanbanError::StatusConflict(_) => "STATUS_CONFLICT",
            KanbanError::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            KanbanError::TaskClaimed { .. } => "TASK_CLAIMED",
            KanbanError::ClaimRequired(_) => "CLAIM_REQUIRED",
            KanbanError::NothingToPick => "NOTHING_TO_PICK",
            KanbanError::Io { .. } => "IO_ERROR",
            KanbanError::Parse { .. } => "PARSE_ERROR",
        }
    }

    /// Machine-readable context for the error, when there is any.
    pub fn details(&self) -> Option<Map<String, Value>> {
        let value = match self {
            KanbanError::InvalidStatus { status, allowed } => {
                json!({ "status": status, "allowed": allowed })
            }
            KanbanError::InvalidDate { value, .. } => json!({ "value": value }),
            KanbanError::InvalidGroupBy { field, allowed } => {
                json!({ "field": field, "allowed": allowed })
            }
            KanbanError::TaskNotFound(id) => json!({ "id": id }),
            KanbanError::Boundary { id, status, edge } => {
                json!({ "id": id, "status": status, "edge": edge })
            }
            KanbanError::WipLimitExceeded {
                status,
                limit,
                count,
            } => json!({ "status": status, "limit": limit, "count": count }),
            KanbanError::ClassWipExceeded {
                class,
                limit,
                count,
            } => json!({ "class": class, "limit": limit, "count": count }),
            KanbanError::SelfReference { id, field } => json!({ "id": id, "field": field }),
            KanbanError::DependencyNotFound(id) => json!({ "id": id }),
            KanbanError::TaskClaimed {
                id,
                claimed_by,
                claimed_at,
            } => json!({ "id": id, "claimed_by": claimed_by, "claimed_at": claimed_at }),
            KanbanError::Io { path, .. } => json!({ "path": path.display().to_string() }),
            KanbanError::Parse { path, line, .. } => {
                json!({ "path": path.display().to_string(), "line": line })
            }
            _ => return None,
        };
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// The `{error, code, details?}` payload printed in JSON mode.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::String(self.to_string()));
        map.insert("code".to_string(), Value::String(self.code().to_string()));
        if let Some(details) = self.details() {
            map.insert("details".to_string(), Value::Object(details));
        }
        Value::Object(map)
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        KanbanError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        KanbanError::InvalidInput(message.into())
    }
}

/// Attach a path to a bare `std::io::Error`.
pub trait IoContext<T> {
    fn at_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn at_path(self, path: &Path) -> Result<T> {
        self.map_err(|err| KanbanError::io(path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(KanbanError::NoChanges.code(), "NO_CHANGES");
        assert_eq!(KanbanError::NothingToPick.code(), "NOTHING_TO_PICK");
        assert_eq!(
            KanbanError::WipLimitExceeded {
                status: "in-progress".to_string(),
                limit: 1,
                count: 1
            }
            .code(),
            "WIP_LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn json_payload_carries_details_for_claims() {
        let err = KanbanError::TaskClaimed {
            id: 4,
            claimed_by: "agent-1".to_string(),
            claimed_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let payload = err.to_json();
        assert_eq!(payload["code"], "TASK_CLAIMED");
        assert_eq!(payload["details"]["claimed_by"], "agent-1");
        assert!(payload["error"].as_str().unwrap().contains("agent-1"));
    }

    #[test]
    fn json_payload_omits_empty_details() {
        let payload = KanbanError::NoChanges.to_json();
        assert!(payload.get("details").is_none());
    }
}
