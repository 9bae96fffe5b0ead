use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::KanbanError;
use crate::store::atomic_write;
use crate::validate::parse_duration;

pub const CONFIG_FILE: &str = "config.yml";
pub const ARCHIVED_STATUS: &str = "archived";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A class of service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassConfig {
    pub name: String,
    /// Board-wide cap on active tasks of this class; 0 means unlimited.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub wip_limit: u32,
    /// Tasks of this class ignore per-column WIP limits.
    #[serde(default, skip_serializing_if = "is_false")]
    pub bypass_column_wip: bool,
}

impl ClassConfig {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            wip_limit: 0,
            bypass_column_wip: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Defaults {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub board: BoardInfo,
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,
    /// Explicit terminal status for boards whose last working column is not "done".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_status: Option<String>,
    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,
    #[serde(default = "default_classes")]
    pub classes: Vec<ClassConfig>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub wip_limits: BTreeMap<String, u32>,
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout: String,
    #[serde(default = "default_next_id")]
    pub next_id: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let mut config = Self {
            version: default_version(),
            board: BoardInfo::default(),
            statuses: default_statuses(),
            terminal_status: None,
            priorities: default_priorities(),
            classes: default_classes(),
            defaults: Defaults::default(),
            wip_limits: BTreeMap::new(),
            claim_timeout: default_claim_timeout(),
            next_id: default_next_id(),
        };
        config.normalize();
        config
    }
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

fn default_statuses() -> Vec<String> {
    ["backlog", "todo", "in-progress", "review", "done", ARCHIVED_STATUS]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_priorities() -> Vec<String> {
    ["low", "medium", "high", "critical"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_classes() -> Vec<ClassConfig> {
    vec![
        ClassConfig {
            name: "expedite".to_string(),
            wip_limit: 1,
            bypass_column_wip: true,
        },
        ClassConfig::named("fixed-date"),
        ClassConfig::named("standard"),
        ClassConfig::named("intangible"),
    ]
}

fn default_claim_timeout() -> String {
    "1h".to_string()
}

fn default_next_id() -> u32 {
    1
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BoardConfig {
    /// Fill in anything a hand-edited config left out so the rest of the
    /// engine can rely on a consistent shape.
    pub fn normalize(&mut self) {
        self.statuses = dedup_trimmed(&self.statuses);
        self.statuses.retain(|s| s != ARCHIVED_STATUS);
        if self.statuses.is_empty() {
            self.statuses = default_statuses();
            self.statuses.retain(|s| s != ARCHIVED_STATUS);
        }
        self.statuses.push(ARCHIVED_STATUS.to_string());

        self.priorities = dedup_trimmed(&self.priorities);
        if self.priorities.is_empty() {
            self.priorities = default_priorities();
        }

        if self.defaults.status.trim().is_empty() || !self.has_status(&self.defaults.status) {
            self.defaults.status = self.statuses[0].clone();
        }
        if self.defaults.priority.trim().is_empty() || !self.has_priority(&self.defaults.priority)
        {
            let middle = (self.priorities.len().saturating_sub(1)) / 2;
            self.defaults.priority = self.priorities[middle].clone();
        }
        if !self.defaults.class.is_empty() && self.class(&self.defaults.class).is_none() {
            self.defaults.class = String::new();
        }
        if self.defaults.class.is_empty() && self.class("standard").is_some() {
            self.defaults.class = "standard".to_string();
        }
        if let Some(terminal) = &self.terminal_status {
            if !self.has_status(terminal) || terminal == ARCHIVED_STATUS {
                self.terminal_status = None;
            }
        }
        if self.next_id == 0 {
            self.next_id = 1;
        }
        self.version = SCHEMA_VERSION;
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.statuses.iter().any(|s| s == status)
    }

    pub fn has_priority(&self, priority: &str) -> bool {
        self.priorities.iter().any(|p| p == priority)
    }

    pub fn class(&self, name: &str) -> Option<&ClassConfig> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Statuses that tasks flow through, i.e. everything but the archive sink.
    pub fn active_statuses(&self) -> &[String] {
        let end = self
            .statuses
            .iter()
            .position(|s| s == ARCHIVED_STATUS)
            .unwrap_or(self.statuses.len());
        &self.statuses[..end]
    }

    pub fn initial_status(&self) -> &str {
        self.active_statuses()
            .first()
            .map(String::as_str)
            .unwrap_or(ARCHIVED_STATUS)
    }

    pub fn terminal_status(&self) -> &str {
        if let Some(terminal) = self.terminal_status.as_deref() {
            return terminal;
        }
        self.active_statuses()
            .last()
            .map(String::as_str)
            .unwrap_or(ARCHIVED_STATUS)
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        status == self.terminal_status()
    }

    pub fn is_archived(status: &str) -> bool {
        status == ARCHIVED_STATUS
    }

    /// Terminal or archived: the task no longer holds up its dependents.
    pub fn is_resolved(&self, status: &str) -> bool {
        self.is_terminal(status) || Self::is_archived(status)
    }

    pub fn status_index(&self, status: &str) -> Option<usize> {
        self.statuses.iter().position(|s| s == status)
    }

    pub fn priority_rank(&self, priority: &str) -> usize {
        self.priorities
            .iter()
            .position(|p| p == priority)
            .unwrap_or(0)
    }

    pub fn class_rank(&self, class: &str) -> usize {
        self.classes
            .iter()
            .position(|c| c.name == class)
            .unwrap_or(self.classes.len())
    }

    pub fn wip_limit(&self, status: &str) -> Option<u32> {
        self.wip_limits.get(status).copied().filter(|limit| *limit > 0)
    }

    pub fn claim_timeout(&self) -> Duration {
        parse_duration(&self.claim_timeout).unwrap_or_else(|_| Duration::hours(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_duration(&self.claim_timeout)
            .map_err(|err| ConfigError::Invalid(format!("claim_timeout: {err}")))?;
        for status in self.wip_limits.keys() {
            if !self.has_status(status) {
                return Err(ConfigError::Invalid(format!(
                    "wip_limits references unknown status {status:?}"
                )));
            }
        }
        Ok(())
    }

    /// Read a dotted configuration key for `config get`.
    pub fn get_key(&self, key: &str) -> Result<serde_json::Value, KanbanError> {
        let value = match key {
            "version" => serde_json::json!(self.version),
            "board.name" => serde_json::json!(self.board.name),
            "board.description" => serde_json::json!(self.board.description),
            "statuses" => serde_json::json!(self.statuses),
            "priorities" => serde_json::json!(self.priorities),
            "classes" => serde_json::to_value(&self.classes).unwrap_or_default(),
            "terminal_status" => serde_json::json!(self.terminal_status()),
            "defaults.status" => serde_json::json!(self.defaults.status),
            "defaults.priority" => serde_json::json!(self.defaults.priority),
            "defaults.class" => serde_json::json!(self.defaults.class),
            "wip_limits" => serde_json::json!(self.wip_limits),
            "claim_timeout" => serde_json::json!(self.claim_timeout),
            "next_id" => serde_json::json!(self.next_id),
            other => match other.strip_prefix("wip_limits.") {
                Some(status) => {
                    if !self.has_status(status) {
                        return Err(KanbanError::InvalidStatus {
                            status: status.to_string(),
                            allowed: self.statuses.clone(),
                        });
                    }
                    serde_json::json!(self.wip_limits.get(status).copied().unwrap_or(0))
                }
                None => return Err(unknown_key(other)),
            },
        };
        Ok(value)
    }

    /// Write a dotted configuration key for `config set`.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<(), KanbanError> {
        let value = value.trim();
        match key {
            "board.name" => self.board.name = value.to_string(),
            "board.description" => self.board.description = value.to_string(),
            "defaults.status" => {
                if !self.has_status(value) || value == ARCHIVED_STATUS {
                    return Err(KanbanError::InvalidStatus {
                        status: value.to_string(),
                        allowed: self.active_statuses().to_vec(),
                    });
                }
                self.defaults.status = value.to_string();
            }
            "defaults.priority" => {
                if !self.has_priority(value) {
                    return Err(KanbanError::invalid(format!(
                        "invalid priority {value:?}; valid priorities: {}",
                        self.priorities.join(", ")
                    )));
                }
                self.defaults.priority = value.to_string();
            }
            "defaults.class" => {
                if !value.is_empty() && self.class(value).is_none() {
                    return Err(KanbanError::invalid(format!(
                        "invalid class {value:?}; valid classes: {}",
                        self.class_names().join(", ")
                    )));
                }
                self.defaults.class = value.to_string();
            }
            "terminal_status" => {
                if !self.has_status(value) || value == ARCHIVED_STATUS {
                    return Err(KanbanError::InvalidStatus {
                        status: value.to_string(),
                        allowed: self.active_statuses().to_vec(),
                    });
                }
                self.terminal_status = Some(value.to_string());
            }
            "claim_timeout" => {
                parse_duration(value)?;
                self.claim_timeout = value.to_string();
            }
            "version" | "statuses" | "priorities" | "classes" | "next_id" | "wip_limits" => {
                return Err(KanbanError::invalid(format!("config key {key:?} is read-only")));
            }
            other => match other.strip_prefix("wip_limits.") {
                Some(status) => {
                    if !self.has_status(status) {
                        return Err(KanbanError::InvalidStatus {
                            status: status.to_string(),
                            allowed: self.statuses.clone(),
                        });
                    }
                    let limit: u32 = value.parse().map_err(|_| {
                        KanbanError::invalid(format!("WIP limit must be a non-negative integer, got {value:?}"))
                    })?;
                    if limit == 0 {
                        self.wip_limits.remove(status);
                    } else {
                        self.wip_limits.insert(status.to_string(), limit);
                    }
                }
                None => return Err(unknown_key(other)),
            },
        }
        Ok(())
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }
}

fn unknown_key(key: &str) -> KanbanError {
    KanbanError::invalid(format!("unknown config key {key:?}"))
}

fn dedup_trimmed(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !out.iter().any(|v| v == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn load_config(root: &Path) -> Result<BoardConfig, ConfigError> {
    let text = fs::read_to_string(config_path(root))?;
    let mut config: BoardConfig = serde_yaml::from_str(&text)?;
    config.normalize();
    Ok(config)
}

pub fn write_config(root: &Path, config: &BoardConfig) -> Result<PathBuf, KanbanError> {
    let path = config_path(root);
    let body = serde_yaml::to_string(config).map_err(|err| KanbanError::Parse {
        path: path.clone(),
        line: None,
        message: err.to_string(),
    })?;
    atomic_write(&path, body.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_and_read_config() {
        let temp = TempDir::new().expect("tempdir");
        let mut config = BoardConfig::default();
        config.board.name = "Ops".to_string();
        config.wip_limits.insert("in-progress".to_string(), 2);
        config.next_id = 7;
        write_config(temp.path(), &config).expect("write config");

        let loaded = load_config(temp.path()).expect("load config");
        assert_eq!(loaded.board.name, "Ops");
        assert_eq!(loaded.wip_limit("in-progress"), Some(2));
        assert_eq!(loaded.next_id, 7);
        assert_eq!(loaded, config);
    }

    #[test]
    fn normalize_appends_archived_sink_and_fills_defaults() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(
            temp.path().join(CONFIG_FILE),
            "statuses: [open, doing, closed]\npriorities: [p3, p2, p1]\n",
        )
        .expect("write");
        let config = load_config(temp.path()).expect("load");
        assert_eq!(config.statuses, vec!["open", "doing", "closed", "archived"]);
        assert_eq!(config.terminal_status(), "closed");
        assert_eq!(config.initial_status(), "open");
        assert_eq!(config.defaults.status, "open");
        assert_eq!(config.defaults.priority, "p2");
        assert_eq!(config.claim_timeout(), Duration::hours(1));
    }

    #[test]
    fn explicit_terminal_status_wins() {
        let mut config = BoardConfig::default();
        config.set_key("terminal_status", "review").expect("set");
        assert!(config.is_terminal("review"));
        assert!(!config.is_terminal("done"));
    }

    #[test]
    fn set_key_validates_values() {
        let mut config = BoardConfig::default();
        let err = config.set_key("defaults.status", "nope").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS");
        let err = config.set_key("claim_timeout", "soon").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        let err = config.set_key("next_id", "9").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        config.set_key("wip_limits.review", "2").expect("wip");
        assert_eq!(config.wip_limit("review"), Some(2));
        config.set_key("wip_limits.review", "0").expect("clear wip");
        assert_eq!(config.wip_limit("review"), None);
        assert_eq!(config.get_key("claim_timeout").unwrap(), "1h");
    }
}
