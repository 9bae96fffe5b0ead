//! Human-readable renderings for table and compact output.

use chrono::{DateTime, Utc};
use kanban_core::activity::ActivityEntry;
use kanban_core::board::Board;
use kanban_core::claim::active_holder;
use kanban_core::task::Task;
use kanban_core::validate::format_timestamp;
use kanban_core::views::{render_task_line, BoardSummary, Metrics};

pub fn task_table(tasks: &[&Task], board: &Board, now: DateTime<Utc>) -> String {
    if tasks.is_empty() {
        return "No tasks found.\n".to_string();
    }
    let timeout = board.config.claim_timeout();
    let mut out = format!(
        "{:<5}  {:<12}  {:<9}  {:<10}  {:<12}  {}\n",
        "ID", "STATUS", "PRIORITY", "CLASS", "CLAIMED", "TITLE"
    );
    for task in tasks {
        let mut title = truncate(&task.title, 50);
        if task.blocked {
            title.push_str(" [blocked]");
        }
        out.push_str(&format!(
            "{:<5}  {:<12}  {:<9}  {:<10}  {:<12}  {}\n",
            task.id,
            task.status,
            task.priority,
            task.class,
            truncate(active_holder(task, now, timeout).unwrap_or("-"), 12),
            title
        ));
    }
    out
}

pub fn task_lines(tasks: &[&Task]) -> String {
    tasks
        .iter()
        .map(|task| format!("{}\n", render_task_line(task)))
        .collect()
}

pub fn task_detail(task: &Task, board: &Board, now: DateTime<Utc>) -> String {
    let mut out = format!("Task #{}: {}\n\n", task.id, task.title);
    let mut row = |label: &str, value: String| {
        if !value.is_empty() {
            out.push_str(&format!("  {:<12} {}\n", format!("{label}:"), value));
        }
    };
    row("Status", task.status.clone());
    row("Priority", task.priority.clone());
    row("Class", task.class.clone());
    row("Assignee", task.assignee.clone());
    row("Tags", task.tags.join(", "));
    row(
        "Due",
        task.due
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    );
    row("Estimate", task.estimate.clone().unwrap_or_default());
    row("Parent", task.parent.map(|p| format!("#{p}")).unwrap_or_default());
    row("Depends on", id_list(&task.depends_on));
    row("Waiting on", id_list(&board.open_dependencies(task)));
    row("Children", id_list(&board.children(task.id)));
    if task.blocked {
        row(
            "Blocked",
            if task.block_reason.is_empty() {
                "yes".to_string()
            } else {
                task.block_reason.clone()
            },
        );
    }
    if let (Some(agent), Some(at)) = (&task.claimed_by, &task.claimed_at) {
        let state = if active_holder(task, now, board.config.claim_timeout()).is_some() {
            ""
        } else {
            " (expired)"
        };
        row("Claimed by", format!("{agent} at {}{state}", format_timestamp(at)));
    }
    row("Created", format_timestamp(&task.created));
    row("Updated", format_timestamp(&task.updated));
    row("Started", task.started.as_ref().map(format_timestamp).unwrap_or_default());
    row("Completed", task.completed.as_ref().map(format_timestamp).unwrap_or_default());
    if !task.body.trim().is_empty() {
        out.push('\n');
        out.push_str(task.body.trim_end());
        out.push('\n');
    }
    out
}

pub fn board_table(summary: &BoardSummary) -> String {
    let title = if summary.name.is_empty() {
        "Board".to_string()
    } else {
        summary.name.clone()
    };
    let mut out = format!("{title} ({} active tasks)\n\n", summary.total);
    out.push_str(&format!(
        "{:<14}  {:>5}  {:>5}  {:>7}  {:>7}  {:>7}\n",
        "STATUS", "COUNT", "WIP", "BLOCKED", "CLAIMED", "OVERDUE"
    ));
    for column in &summary.columns {
        let wip = column
            .wip_limit
            .map(|limit| limit.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<14}  {:>5}  {:>5}  {:>7}  {:>7}  {:>7}\n",
            column.status, column.count, wip, column.blocked, column.claimed, column.overdue
        ));
    }
    let priorities: Vec<String> = summary
        .priorities
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .collect();
    out.push_str(&format!("\nPriorities: {}\n", priorities.join(" ")));
    out
}

pub fn metrics_text(metrics: &Metrics) -> String {
    let hours = |value: Option<f64>| {
        value
            .map(|h| format!("{h:.1}h"))
            .unwrap_or_else(|| "-".to_string())
    };
    let mut out = String::new();
    out.push_str(&format!("Throughput (7d):   {}\n", metrics.throughput_7d));
    out.push_str(&format!("Throughput (30d):  {}\n", metrics.throughput_30d));
    out.push_str(&format!("Completed sample:  {}\n", metrics.completed_since));
    out.push_str(&format!("Avg lead time:     {}\n", hours(metrics.avg_lead_time_hours)));
    out.push_str(&format!("Avg cycle time:    {}\n", hours(metrics.avg_cycle_time_hours)));
    out.push_str(&format!("Work in progress:  {}\n", metrics.wip));
    if !metrics.aging.is_empty() {
        out.push_str("\nAging work:\n");
        for item in &metrics.aging {
            out.push_str(&format!(
                "  #{:<4} {:>6.1}d  {:<12} {}\n",
                item.id, item.age_days, item.status, item.title
            ));
        }
    }
    out
}

pub fn log_lines(entries: &[ActivityEntry]) -> String {
    if entries.is_empty() {
        return "No activity.\n".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let task = if entry.task_id == 0 {
                "-".to_string()
            } else {
                format!("#{}", entry.task_id)
            };
            let agent = entry
                .agent
                .as_deref()
                .map(|a| format!(" ({a})"))
                .unwrap_or_default();
            format!(
                "{}  {:<8} {:<5} {}{}\n",
                entry.timestamp, entry.action, task, entry.detail, agent
            )
        })
        .collect()
}

fn id_list(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| format!("#{id}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
