use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::error::KanbanError;
use crate::validate::{format_timestamp, parse_date, parse_timestamp};

pub const SLUG_MAX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: u32,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub class: String,
    pub assignee: String,
    pub tags: Vec<String>,
    pub due: Option<NaiveDate>,
    pub estimate: Option<String>,
    pub parent: Option<u32>,
    pub depends_on: Vec<u32>,
    pub blocked: bool,
    pub block_reason: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// Frontmatter keys this tool does not know about, kept in file order.
    pub extra: Mapping,
    pub body: String,
    pub file_path: Option<PathBuf>,
    pub file_mtime: Option<SystemTime>,
}

impl Task {
    pub fn new(id: u32, title: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.to_string(),
            status: String::new(),
            priority: String::new(),
            class: String::new(),
            assignee: String::new(),
            tags: Vec::new(),
            due: None,
            estimate: None,
            parent: None,
            depends_on: Vec::new(),
            blocked: false,
            block_reason: String::new(),
            claimed_by: None,
            claimed_at: None,
            created: now,
            updated: now,
            started: None,
            completed: None,
            extra: Mapping::new(),
            body: String::new(),
            file_path: None,
            file_mtime: None,
        }
    }

    pub fn file_name(&self) -> String {
        task_file_name(self.id, &self.title)
    }

    pub fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

#[derive(Debug, Error)]
pub enum TaskParseError {
    #[error("Missing front matter delimiter")]
    MissingFrontMatter,
    #[error("Missing closing --- for front matter")]
    MissingFrontMatterEnd,
    #[error("line {line}: {message}")]
    Yaml { line: usize, message: String },
    #[error("line {line}: invalid {field}: {message}")]
    Field {
        field: &'static str,
        line: usize,
        message: String,
    },
    #[error("Invalid task file: {0}")]
    Invalid(String),
}

impl TaskParseError {
    /// 1-based line in the task file, when the error can be pinned to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            TaskParseError::MissingFrontMatter => Some(1),
            TaskParseError::Yaml { line, .. } | TaskParseError::Field { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub fn split_front_matter(text: &str) -> Result<(String, String), TaskParseError> {
    if !text.starts_with("---") {
        return Err(TaskParseError::MissingFrontMatter);
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || lines[0].trim() != "---" {
        return Err(TaskParseError::MissingFrontMatter);
    }
    let mut end_idx = None;
    for (idx, line) in lines.iter().enumerate().skip(1) {
        if line.trim() == "---" {
            end_idx = Some(idx);
            break;
        }
    }
    let end_idx = end_idx.ok_or(TaskParseError::MissingFrontMatterEnd)?;
    let front = lines[1..end_idx].join("\n");
    let body = lines[end_idx + 1..].join("\n");
    Ok((front, body))
}

pub fn parse_task_file(path: &Path) -> Result<Task, TaskParseError> {
    let text = fs::read_to_string(path).map_err(|err| TaskParseError::Invalid(err.to_string()))?;
    let mut task = parse_task_text(&text)?;
    task.file_path = Some(path.to_path_buf());
    task.file_mtime = fs::metadata(path).and_then(|meta| meta.modified()).ok();
    Ok(task)
}

/// Parse a task document. A missing `id` parses as 0; callers decide how to
/// adopt such orphans.
pub fn parse_task_text(text: &str) -> Result<Task, TaskParseError> {
    let (front, body) = split_front_matter(text)?;
    let data = match serde_yaml::from_str::<Value>(&front) {
        Ok(Value::Mapping(map)) => map,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            return Err(TaskParseError::Yaml {
                line: 2,
                message: "front matter must be a mapping".to_string(),
            })
        }
        Err(err) => {
            let line = err.location().map(|loc| loc.line() + 1).unwrap_or(2);
            return Err(TaskParseError::Yaml {
                line,
                message: err.to_string(),
            });
        }
    };

    let field_err = |field: &'static str, message: String| TaskParseError::Field {
        field,
        line: key_line(&front, field),
        message,
    };
    let get = |key: &str| data.get(&Value::String(key.to_string()));
    let text_of = |key: &str| {
        get(key)
            .and_then(value_to_string)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let opt_text = |key: &str| Some(text_of(key)).filter(|s| !s.is_empty());
    let opt_ts = |key: &'static str| -> Result<Option<DateTime<Utc>>, TaskParseError> {
        match opt_text(key) {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .map_err(|err| field_err(key, err.to_string())),
        }
    };
    let opt_id = |key: &'static str| -> Result<Option<u32>, TaskParseError> {
        match opt_text(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim_start_matches('#')
                .parse::<u32>()
                .map(Some)
                .map_err(|_| field_err(key, format!("{raw:?} is not a task id"))),
        }
    };

    let id = opt_id("id")?.unwrap_or(0);
    let title = text_of("title");
    let due = match opt_text("due") {
        None => None,
        Some(raw) => Some(parse_date(&raw).map_err(|err| field_err("due", err.to_string()))?),
    };
    let mut depends_on = Vec::new();
    for raw in parse_list_value(get("depends_on")) {
        let dep = raw
            .trim_start_matches('#')
            .parse::<u32>()
            .map_err(|_| field_err("depends_on", format!("{raw:?} is not a task id")))?;
        if !depends_on.contains(&dep) {
            depends_on.push(dep);
        }
    }
    let blocked = match get("blocked") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(value)) => *value,
        Some(other) => matches!(
            value_to_string(other).as_deref().map(str::trim),
            Some("true") | Some("yes")
        ),
    };
    let created = opt_ts("created")?;
    let updated = opt_ts("updated")?;
    let fallback = created.or(updated).unwrap_or_else(Utc::now);

    let mut extra = Mapping::new();
    for (key, value) in &data {
        let known = value_to_string(key)
            .map(|k| KNOWN_KEYS.contains(&k.as_str()))
            .unwrap_or(false);
        if !known {
            extra.insert(key.clone(), value.clone());
        }
    }

    let mut tags = Vec::new();
    for tag in parse_list_value(get("tags")) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(Task {
        id,
        title,
        status: text_of("status"),
        priority: text_of("priority"),
        class: text_of("class"),
        assignee: text_of("assignee"),
        tags,
        due,
        estimate: opt_text("estimate"),
        parent: opt_id("parent")?,
        depends_on,
        blocked,
        block_reason: text_of("block_reason"),
        claimed_by: opt_text("claimed_by"),
        claimed_at: opt_ts("claimed_at")?,
        created: created.unwrap_or(fallback),
        updated: updated.unwrap_or(fallback),
        started: opt_ts("started")?,
        completed: opt_ts("completed")?,
        extra,
        body: body.trim_start_matches('\n').trim_end().to_string(),
        file_path: None,
        file_mtime: None,
    })
}

const KNOWN_KEYS: [&str; 19] = [
    "id",
    "title",
    "status",
    "priority",
    "class",
    "assignee",
    "tags",
    "due",
    "estimate",
    "parent",
    "depends_on",
    "blocked",
    "block_reason",
    "claimed_by",
    "claimed_at",
    "created",
    "updated",
    "started",
    "completed",
];

/// Render the on-disk document. Optional fields that are unset are omitted.
pub fn render_task(task: &Task) -> Result<String, KanbanError> {
    let mut map = Mapping::new();
    let mut put = |key: &str, value: Value| {
        map.insert(Value::String(key.to_string()), value);
    };
    let string = |s: &str| Value::String(s.to_string());
    let ts = |t: &DateTime<Utc>| Value::String(format_timestamp(t));

    put("id", Value::Number(task.id.into()));
    put("title", string(&task.title));
    put("status", string(&task.status));
    put("priority", string(&task.priority));
    if !task.class.is_empty() {
        put("class", string(&task.class));
    }
    if !task.assignee.is_empty() {
        put("assignee", string(&task.assignee));
    }
    if !task.tags.is_empty() {
        put(
            "tags",
            Value::Sequence(task.tags.iter().map(|t| string(t)).collect()),
        );
    }
    if let Some(due) = task.due {
        put("due", string(&due.format("%Y-%m-%d").to_string()));
    }
    if let Some(estimate) = &task.estimate {
        put("estimate", string(estimate));
    }
    if let Some(parent) = task.parent {
        put("parent", Value::Number(parent.into()));
    }
    if !task.depends_on.is_empty() {
        put(
            "depends_on",
            Value::Sequence(
                task.depends_on
                    .iter()
                    .map(|id| Value::Number((*id).into()))
                    .collect(),
            ),
        );
    }
    if task.blocked {
        put("blocked", Value::Bool(true));
        if !task.block_reason.is_empty() {
            put("block_reason", string(&task.block_reason));
        }
    }
    if let (Some(agent), Some(at)) = (&task.claimed_by, &task.claimed_at) {
        put("claimed_by", string(agent));
        put("claimed_at", ts(at));
    }
    put("created", ts(&task.created));
    put("updated", ts(&task.updated));
    if let Some(started) = &task.started {
        put("started", ts(started));
    }
    if let Some(completed) = &task.completed {
        put("completed", ts(completed));
    }
    for (key, value) in &task.extra {
        map.insert(key.clone(), value.clone());
    }

    let front = serde_yaml::to_string(&Value::Mapping(map)).map_err(|err| KanbanError::Parse {
        path: task
            .file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(task.file_name())),
        line: None,
        message: format!("cannot serialize front matter: {err}"),
    })?;
    let mut out = String::from("---\n");
    out.push_str(&front);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    let body = task.body.trim_end();
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    Ok(out)
}

pub fn parse_list_value(value: Option<&Value>) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(value_to_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => parse_list_string(s),
        Some(other) => value_to_string(other)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| vec![s])
            .unwrap_or_default(),
    }
}

fn parse_list_string(value: &str) -> Vec<String> {
    let raw = value.trim();
    if raw.is_empty() || raw == "[]" {
        return Vec::new();
    }
    let inner = if raw.starts_with('[') && raw.ends_with(']') {
        raw[1..raw.len() - 1].trim()
    } else {
        raw
    };
    inner
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(val) => Some(val.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(val) => Some(val.to_string()),
        Value::Null => None,
        _ => serde_yaml::to_string(value).ok().map(|s| s.trim().to_string()),
    }
}

/// File line (1-based, counting the opening delimiter) where `key` is set.
fn key_line(front: &str, key: &str) -> usize {
    front
        .lines()
        .position(|line| {
            line.strip_prefix(key)
                .map(|rest| rest.trim_start().starts_with(':'))
                .unwrap_or(false)
        })
        .map(|idx| idx + 2)
        .unwrap_or(1)
}

fn filename_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(?:-|\.md$)").expect("regex"))
}

pub fn id_from_filename(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let caps = filename_id_re().captures(name)?;
    caps.get(1)?.as_str().parse::<u32>().ok().filter(|id| *id > 0)
}

/// Lowercase, collapse every run of non-alphanumerics to a single `-`, and cut
/// at a word boundary so the slug stays within [`SLUG_MAX_LEN`].
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.len() > SLUG_MAX_LEN {
        let cut = if slug.as_bytes()[SLUG_MAX_LEN] == b'-' {
            SLUG_MAX_LEN
        } else {
            slug[..SLUG_MAX_LEN].rfind('-').unwrap_or(SLUG_MAX_LEN)
        };
        slug.truncate(cut);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

pub fn task_file_name(id: u32, title: &str) -> String {
    format!("{:03}-{}.md", id, slugify(title))
}
