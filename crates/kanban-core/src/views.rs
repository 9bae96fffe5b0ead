//! Read-only projections over a loaded board: list filtering, grouping,
//! the board summary, flow metrics and the agent context document.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::board::Board;
use crate::claim::{active_holder, is_active_claim};
use crate::config::BoardConfig;
use crate::error::{IoContext, KanbanError, Result};
use crate::store::atomic_write;
use crate::task::Task;
use crate::validate::format_timestamp;

pub const SORT_KEYS: [&str; 6] = ["id", "status", "priority", "created", "updated", "due"];
pub const GROUP_KEYS: [&str; 5] = ["status", "priority", "class", "assignee", "tag"];

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub statuses: Vec<String>,
    pub priorities: Vec<String>,
    pub classes: Vec<String>,
    pub assignee: Option<String>,
    pub tag: Option<String>,
    pub blocked: Option<bool>,
    pub unblocked: bool,
    pub parent: Option<u32>,
    pub claimed_by: Option<String>,
    pub unclaimed: bool,
    pub search: Option<String>,
    /// Include archived tasks. Implied when `statuses` names the sink.
    pub archived: bool,
    pub sort: Option<String>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

pub fn filter_tasks<'a>(board: &'a Board, query: &ListQuery, now: DateTime<Utc>) -> Result<Vec<&'a Task>> {
    let config = &board.config;
    for status in &query.statuses {
        if !config.has_status(status) {
            return Err(KanbanError::InvalidStatus {
                status: status.clone(),
                allowed: config.statuses.clone(),
            });
        }
    }
    let timeout = config.claim_timeout();
    let archived_requested = query.archived || query.statuses.iter().any(|s| BoardConfig::is_archived(s));
    let mut result: Vec<&Task> = board
        .tasks()
        .filter(|task| archived_requested || !BoardConfig::is_archived(&task.status))
        .collect();

    if !query.statuses.is_empty() {
        result.retain(|task| query.statuses.contains(&task.status));
    }
    if !query.priorities.is_empty() {
        result.retain(|task| query.priorities.contains(&task.priority));
    }
    if !query.classes.is_empty() {
        result.retain(|task| query.classes.contains(&task.class));
    }
    if let Some(assignee) = &query.assignee {
        result.retain(|task| task.assignee.eq_ignore_ascii_case(assignee));
    }
    if let Some(tag) = &query.tag {
        result.retain(|task| task.tags.iter().any(|t| t == tag));
    }
    if let Some(blocked) = query.blocked {
        result.retain(|task| task.blocked == blocked);
    }
    if query.unblocked {
        result.retain(|task| board.is_unblocked(task));
    }
    if let Some(parent) = query.parent {
        result.retain(|task| task.parent == Some(parent));
    }
    if let Some(agent) = &query.claimed_by {
        result.retain(|task| active_holder(task, now, timeout) == Some(agent.as_str()));
    }
    if query.unclaimed {
        result.retain(|task| !is_active_claim(task, now, timeout));
    }
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        result.retain(|task| {
            task.title.to_lowercase().contains(&needle) || task.body.to_lowercase().contains(&needle)
        });
    }

    if let Some(key) = &query.sort {
        sort_tasks(config, &mut result, key)?;
    }
    if query.reverse {
        result.reverse();
    }
    if let Some(limit) = query.limit {
        result.truncate(limit);
    }
    Ok(result)
}

/// Stable sort by `key`; ties keep id order.
pub fn sort_tasks(config: &BoardConfig, tasks: &mut [&Task], key: &str) -> Result<()> {
    match key {
        "id" => tasks.sort_by_key(|task| task.id),
        "status" => tasks.sort_by_key(|task| config.status_index(&task.status).unwrap_or(usize::MAX)),
        "priority" => tasks.sort_by(|a, b| {
            config
                .priority_rank(&b.priority)
                .cmp(&config.priority_rank(&a.priority))
        }),
        "created" => tasks.sort_by_key(|task| task.created),
        "updated" => tasks.sort_by_key(|task| task.updated),
        "due" => tasks.sort_by(|a, b| due_order(a.due, b.due)),
        other => {
            return Err(KanbanError::invalid(format!(
                "invalid sort key {other:?}; valid keys: {}",
                SORT_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

fn due_order(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order used by `pick`: class precedence, highest priority, earliest due, id.
pub fn pick_order(config: &BoardConfig, a: &Task, b: &Task) -> Ordering {
    config
        .class_rank(&a.class)
        .cmp(&config.class_rank(&b.class))
        .then_with(|| {
            config
                .priority_rank(&b.priority)
                .cmp(&config.priority_rank(&a.priority))
        })
        .then_with(|| due_order(a.due, b.due))
        .then_with(|| a.id.cmp(&b.id))
}

/// Group listed tasks. Configured vocabularies keep their configured order;
/// free-text keys sort alphabetically with `(none)` last.
pub fn group_tasks<'a>(
    config: &BoardConfig,
    tasks: &[&'a Task],
    field: &str,
) -> Result<Vec<(String, Vec<&'a Task>)>> {
    if !GROUP_KEYS.contains(&field) {
        return Err(KanbanError::InvalidGroupBy {
            field: field.to_string(),
            allowed: GROUP_KEYS.iter().map(|k| k.to_string()).collect(),
        });
    }
    let mut groups: BTreeMap<String, Vec<&'a Task>> = BTreeMap::new();
    for task in tasks {
        let keys: Vec<String> = match field {
            "status" => vec![task.status.clone()],
            "priority" => vec![task.priority.clone()],
            "class" => vec![task.class.clone()],
            "assignee" => vec![task.assignee.clone()],
            _ if task.tags.is_empty() => vec![String::new()],
            _ => task.tags.clone(),
        };
        for key in keys {
            groups.entry(key).or_default().push(*task);
        }
    }

    let order: Vec<String> = match field {
        "status" => config.statuses.clone(),
        "priority" => config.priorities.iter().rev().cloned().collect(),
        "class" => config.class_names(),
        _ => Vec::new(),
    };
    let mut out = Vec::new();
    for key in &order {
        if let Some(list) = groups.remove(key) {
            out.push((key.clone(), list));
        }
    }
    let none = groups.remove("");
    for (key, list) in groups {
        out.push((key, list));
    }
    if let Some(list) = none {
        out.push(("(none)".to_string(), list));
    }
    Ok(out)
}

pub fn task_to_json_value(task: &Task, board: &Board, now: DateTime<Utc>, include_body: bool) -> Value {
    let timeout = board.config.claim_timeout();
    let ts = |t: &Option<DateTime<Utc>>| {
        t.as_ref()
            .map(|t| Value::String(format_timestamp(t)))
            .unwrap_or(Value::Null)
    };
    let mut map = Map::new();
    map.insert("id".to_string(), Value::from(task.id));
    map.insert("title".to_string(), Value::String(task.title.clone()));
    map.insert("status".to_string(), Value::String(task.status.clone()));
    map.insert("priority".to_string(), Value::String(task.priority.clone()));
    map.insert("class".to_string(), Value::String(task.class.clone()));
    map.insert("assignee".to_string(), Value::String(task.assignee.clone()));
    map.insert(
        "tags".to_string(),
        Value::Array(task.tags.iter().cloned().map(Value::String).collect()),
    );
    map.insert(
        "due".to_string(),
        task.due
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
    );
    map.insert(
        "estimate".to_string(),
        task.estimate.clone().map(Value::String).unwrap_or(Value::Null),
    );
    map.insert(
        "parent".to_string(),
        task.parent.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "depends_on".to_string(),
        Value::Array(task.depends_on.iter().map(|d| Value::from(*d)).collect()),
    );
    map.insert("blocked".to_string(), Value::Bool(task.blocked));
    map.insert("block_reason".to_string(), Value::String(task.block_reason.clone()));
    map.insert(
        "claimed_by".to_string(),
        task.claimed_by.clone().map(Value::String).unwrap_or(Value::Null),
    );
    map.insert("claimed_at".to_string(), ts(&task.claimed_at));
    map.insert(
        "claim_active".to_string(),
        Value::Bool(is_active_claim(task, now, timeout)),
    );
    map.insert("unblocked".to_string(), Value::Bool(board.is_unblocked(task)));
    map.insert("created".to_string(), Value::String(format_timestamp(&task.created)));
    map.insert("updated".to_string(), Value::String(format_timestamp(&task.updated)));
    map.insert("started".to_string(), ts(&task.started));
    map.insert("completed".to_string(), ts(&task.completed));
    if !task.extra.is_empty() {
        map.insert(
            "extra".to_string(),
            serde_json::to_value(&task.extra).unwrap_or(Value::Object(Map::new())),
        );
    }
    map.insert(
        "path".to_string(),
        task.file_path
            .as_ref()
            .map(|path| Value::String(path.display().to_string()))
            .unwrap_or(Value::Null),
    );
    if include_body {
        map.insert("body".to_string(), Value::String(task.body.clone()));
    }
    Value::Object(map)
}

/// One-line rendering for `--compact`.
pub fn render_task_line(task: &Task) -> String {
    let title = if task.title.trim().is_empty() {
        "(no title)"
    } else {
        task.title.trim()
    };
    let mut line = format!("#{} [{}] {} ({})", task.id, task.status, title, task.priority);
    if task.blocked {
        line.push_str(" blocked");
    }
    if let Some(agent) = &task.claimed_by {
        line.push_str(&format!(" @{agent}"));
    }
    if !task.tags.is_empty() {
        line.push_str(&format!(" #{}", task.tags.join(" #")));
    }
    line
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSummary {
    pub status: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<u32>,
    pub blocked: usize,
    pub claimed: usize,
    pub overdue: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardSummary {
    pub name: String,
    pub total: usize,
    pub columns: Vec<ColumnSummary>,
    pub priorities: Vec<(String, usize)>,
}

pub fn board_summary(board: &Board, now: DateTime<Utc>) -> BoardSummary {
    let config = &board.config;
    let timeout = config.claim_timeout();
    let today = now.date_naive();
    let columns = config
        .statuses
        .iter()
        .map(|status| {
            let tasks: Vec<&Task> = board.in_status(status).collect();
            ColumnSummary {
                status: status.clone(),
                count: tasks.len(),
                wip_limit: config.wip_limit(status),
                blocked: tasks.iter().filter(|t| t.blocked).count(),
                claimed: tasks.iter().filter(|t| is_active_claim(t, now, timeout)).count(),
                overdue: tasks
                    .iter()
                    .filter(|t| !config.is_resolved(&t.status))
                    .filter(|t| t.due.map(|d| d < today).unwrap_or(false))
                    .count(),
            }
        })
        .collect();
    let priorities = config
        .priorities
        .iter()
        .rev()
        .map(|p| {
            let count = board
                .tasks()
                .filter(|t| !BoardConfig::is_archived(&t.status) && &t.priority == p)
                .count();
            (p.clone(), count)
        })
        .collect();
    BoardSummary {
        name: config.board.name.clone(),
        total: board
            .tasks()
            .filter(|t| !BoardConfig::is_archived(&t.status))
            .count(),
        columns,
        priorities,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgingItem {
    pub id: u32,
    pub title: String,
    pub status: String,
    pub age_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub throughput_7d: usize,
    pub throughput_30d: usize,
    pub completed_since: usize,
    pub avg_lead_time_hours: Option<f64>,
    pub avg_cycle_time_hours: Option<f64>,
    pub wip: usize,
    pub aging: Vec<AgingItem>,
}

/// Flow metrics over completed work. `since` bounds the lead/cycle sample.
pub fn metrics(board: &Board, now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> Metrics {
    let config = &board.config;
    let completed: Vec<(&Task, DateTime<Utc>)> = board
        .tasks()
        .filter_map(|t| t.completed.map(|c| (t, c)))
        .collect();
    let within = |days: i64| {
        completed
            .iter()
            .filter(|(_, c)| *c <= now && now.signed_duration_since(*c) <= Duration::days(days))
            .count()
    };
    let sample: Vec<&(&Task, DateTime<Utc>)> = completed
        .iter()
        .filter(|(_, c)| since.map_or(true, |s| *c >= s))
        .collect();
    let hours = |d: Duration| d.num_seconds() as f64 / 3600.0;
    let average = |values: Vec<f64>| {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };
    let lead = average(
        sample
            .iter()
            .map(|(t, c)| hours(c.signed_duration_since(t.created)))
            .collect(),
    );
    let cycle = average(
        sample
            .iter()
            .filter_map(|(t, c)| t.started.map(|s| hours(c.signed_duration_since(s))))
            .collect(),
    );

    let mut aging: Vec<AgingItem> = board
        .tasks()
        .filter(|t| !config.is_resolved(&t.status))
        .filter_map(|t| {
            t.started.map(|s| AgingItem {
                id: t.id,
                title: t.title.clone(),
                status: t.status.clone(),
                age_days: (now.signed_duration_since(s).num_seconds() as f64 / 86_400.0 * 10.0).round()
                    / 10.0,
            })
        })
        .collect();
    aging.sort_by(|a, b| b.age_days.partial_cmp(&a.age_days).unwrap_or(Ordering::Equal));

    Metrics {
        throughput_7d: within(7),
        throughput_30d: within(30),
        completed_since: sample.len(),
        avg_lead_time_hours: lead,
        avg_cycle_time_hours: cycle,
        wip: aging.len(),
        aging,
    }
}

pub const CONTEXT_START: &str = "<!-- kanban:context:start -->";
pub const CONTEXT_END: &str = "<!-- kanban:context:end -->";

/// Markdown snapshot of the board for agents picking up work.
pub fn context_markdown(board: &Board, now: DateTime<Utc>, days: i64) -> String {
    let config = &board.config;
    let timeout = config.claim_timeout();
    let name = if config.board.name.is_empty() {
        "Board"
    } else {
        config.board.name.as_str()
    };
    let mut out = format!("## {name} context\n\n_Generated {}_\n", format_timestamp(&now));

    let in_flight: Vec<&Task> = board
        .tasks()
        .filter(|t| t.status != config.initial_status() && !config.is_resolved(&t.status))
        .collect();
    push_section(&mut out, "In progress", &in_flight, |t| {
        let claim = active_holder(t, now, timeout)
            .map(|a| format!(", claimed by {a}"))
            .unwrap_or_default();
        format!("#{} {} ({}{claim})", t.id, t.title, t.status)
    });

    let blocked: Vec<&Task> = board
        .tasks()
        .filter(|t| !config.is_resolved(&t.status))
        .filter(|t| t.blocked || !board.is_unblocked(t))
        .collect();
    push_section(&mut out, "Blocked", &blocked, |t| {
        if t.blocked {
            let reason = if t.block_reason.is_empty() { "blocked" } else { t.block_reason.as_str() };
            format!("#{} {}: {reason}", t.id, t.title)
        } else {
            let open = board
                .open_dependencies(t)
                .iter()
                .map(|d| format!("#{d}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("#{} {}: waiting on {open}", t.id, t.title)
        }
    });

    let mut ready: Vec<&Task> = board
        .tasks()
        .filter(|t| !config.is_resolved(&t.status))
        .filter(|t| !t.blocked && board.is_unblocked(t) && !is_active_claim(t, now, timeout))
        .collect();
    ready.sort_by(|a, b| pick_order(config, a, b));
    ready.truncate(5);
    push_section(&mut out, "Ready to pick", &ready, |t| {
        format!("#{} {} ({}, {})", t.id, t.title, t.priority, t.status)
    });

    let window = Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut done: Vec<&Task> = board
        .tasks()
        .filter(|t| t.completed.map(|c| c >= window).unwrap_or(false))
        .collect();
    done.sort_by_key(|t| std::cmp::Reverse(t.completed));
    push_section(&mut out, &format!("Completed in the last {days} days"), &done, |t| {
        format!("#{} {}", t.id, t.title)
    });
    out
}

fn push_section<F>(out: &mut String, title: &str, tasks: &[&Task], line: F)
where
    F: Fn(&Task) -> String,
{
    out.push_str(&format!("\n### {title}\n\n"));
    if tasks.is_empty() {
        out.push_str("_none_\n");
        return;
    }
    for task in tasks {
        out.push_str(&format!("- {}\n", line(task)));
    }
}

/// Write `content` between the context markers of `path`, keeping whatever
/// surrounds them. Files without markers get the block appended.
pub fn write_context(path: &Path, content: &str) -> Result<()> {
    let block = format!("{CONTEXT_START}\n{}\n{CONTEXT_END}\n", content.trim_end());
    let existing = if path.exists() {
        fs::read_to_string(path).at_path(path)?
    } else {
        String::new()
    };
    let updated = match (existing.find(CONTEXT_START), existing.find(CONTEXT_END)) {
        (Some(start), Some(end)) if end > start => {
            let tail = &existing[end + CONTEXT_END.len()..];
            let tail = tail.strip_prefix('\n').unwrap_or(tail);
            format!("{}{}{}", &existing[..start], block, tail)
        }
        _ if existing.trim().is_empty() => block,
        _ => format!("{}\n\n{}", existing.trim_end(), block),
    };
    atomic_write(path, updated.as_bytes())
}
