use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IoContext, KanbanError, Result};
use crate::validate::format_timestamp;

pub const LOG_FILE: &str = "activity.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Edit,
    Move,
    Delete,
    Archive,
    Block,
    Unblock,
    Claim,
    Release,
    Handoff,
    Config,
    Repair,
}

impl Action {
    pub const ALL: [Action; 12] = [
        Action::Create,
        Action::Edit,
        Action::Move,
        Action::Delete,
        Action::Archive,
        Action::Block,
        Action::Unblock,
        Action::Claim,
        Action::Release,
        Action::Handoff,
        Action::Config,
        Action::Repair,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Move => "move",
            Action::Delete => "delete",
            Action::Archive => "archive",
            Action::Block => "block",
            Action::Unblock => "unblock",
            Action::Claim => "claim",
            Action::Release => "release",
            Action::Handoff => "handoff",
            Action::Config => "config",
            Action::Repair => "repair",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim().to_lowercase();
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| {
                KanbanError::invalid(format!(
                    "unknown action {value:?}; valid actions: {}",
                    Action::ALL.map(Action::as_str).join(", ")
                ))
            })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub action: Action,
    /// 0 for board-level entries such as `config`.
    pub task_id: u32,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl ActivityEntry {
    pub fn new(now: DateTime<Utc>, action: Action, task_id: u32, detail: impl Into<String>) -> Self {
        Self {
            timestamp: format_timestamp(&now),
            action,
            task_id,
            detail: detail.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: Option<&str>) -> Self {
        self.agent = agent.map(str::to_string);
        self
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

pub fn log_path(root: &Path) -> PathBuf {
    root.join(LOG_FILE)
}

/// Append entries as JSON Lines; the handle is held only for this call.
pub fn append_entries(root: &Path, entries: &[ActivityEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let path = log_path(root);
    let mut buf = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|err| KanbanError::Parse {
            path: path.clone(),
            line: None,
            message: err.to_string(),
        })?;
        buf.push_str(&line);
        buf.push('\n');
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .at_path(&path)?;
    file.write_all(buf.as_bytes()).at_path(&path)?;
    Ok(())
}

/// Read every entry in file order. Malformed lines are skipped and returned
/// as warnings.
pub fn read_log(root: &Path) -> Result<(Vec<ActivityEntry>, Vec<String>)> {
    let path = log_path(root);
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }
    let text = fs::read_to_string(&path).at_path(&path)?;
    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActivityEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warnings.push(format!(
                "skipping {}:{}: {}",
                path.display(),
                idx + 1,
                err
            )),
        }
    }
    Ok((entries, warnings))
}

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub action: Option<Action>,
    pub task: Option<u32>,
    pub limit: Option<usize>,
}

/// Filter entries; `limit` keeps the most recent matches, oldest first.
pub fn query_log(entries: &[ActivityEntry], query: &LogQuery) -> Vec<ActivityEntry> {
    let mut matched: Vec<ActivityEntry> = entries
        .iter()
        .filter(|entry| query.action.map_or(true, |a| entry.action == a))
        .filter(|entry| query.task.map_or(true, |id| entry.task_id == id))
        .filter(|entry| match query.since {
            Some(since) => entry.at().map_or(false, |at| at >= since),
            None => true,
        })
        .cloned()
        .collect();
    if let Some(limit) = query.limit {
        if matched.len() > limit {
            matched.drain(..matched.len() - limit);
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_round_trip_in_order() {
        let temp = TempDir::new().expect("tempdir");
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        append_entries(temp.path(), &[ActivityEntry::new(now, Action::Create, 1, "created")]).unwrap();
        append_entries(
            temp.path(),
            &[
                ActivityEntry::new(now, Action::Move, 1, "backlog -> todo"),
                ActivityEntry::new(now, Action::Claim, 1, "claimed").with_agent(Some("bot")),
            ],
        )
        .unwrap();

        let text = fs::read_to_string(log_path(temp.path())).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().contains("\"timestamp\":\"2026-01-01T12:00:00Z\""));
        assert!(!text.lines().next().unwrap().contains("agent"));

        let (entries, warnings) = read_log(temp.path()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(
            entries.iter().map(|e| e.action).collect::<Vec<_>>(),
            vec![Action::Create, Action::Move, Action::Claim]
        );
        assert_eq!(entries[2].agent.as_deref(), Some("bot"));
    }

    #[test]
    fn read_log_skips_garbage_lines() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(log_path(temp.path()), "not json\n").unwrap();
        let (entries, warnings) = read_log(temp.path()).unwrap();
        assert!(entries.is_empty());
        assert!(warnings[0].contains(":1"));
    }

    #[test]
    fn query_filters_and_keeps_latest() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entries: Vec<_> = (0..5)
            .map(|i| {
                let action = if i % 2 == 0 { Action::Edit } else { Action::Move };
                ActivityEntry::new(base + chrono::Duration::days(i), action, (i + 1) as u32, "")
            })
            .collect();
        let query = LogQuery {
            action: Some(Action::Edit),
            limit: Some(2),
            ..LogQuery::default()
        };
        let ids: Vec<_> = query_log(&entries, &query).iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![3, 5]);

        let query = LogQuery {
            since: Some(base + chrono::Duration::days(3)),
            ..LogQuery::default()
        };
        assert_eq!(query_log(&entries, &query).len(), 2);
        assert_eq!(Action::parse("Handoff").unwrap(), Action::Handoff);
        assert!(Action::parse("nope").is_err());
    }
}
