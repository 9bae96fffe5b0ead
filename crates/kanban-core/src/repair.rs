//! Consistency repair run on every load: orphan ids, duplicate ids,
//! filename drift and a stale `next_id`. Every fix is written back, logged
//! and reported as a warning.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::activity::{append_entries, Action, ActivityEntry};
use crate::config::{write_config, BoardConfig};
use crate::error::Result;
use crate::store::{tasks_dir, write_task, LoadedBoard};
use crate::task::{id_from_filename, Task};

#[derive(Debug, Clone)]
pub struct Repaired {
    pub config: BoardConfig,
    pub tasks: Vec<Task>,
    pub warnings: Vec<String>,
}

pub fn repair(root: &Path, loaded: LoadedBoard, now: DateTime<Utc>) -> Result<Repaired> {
    let LoadedBoard {
        mut config,
        mut tasks,
        mut warnings,
    } = loaded;
    let mut entries = Vec::new();
    let mut rewrite: HashSet<usize> = HashSet::new();
    let mut note = |warnings: &mut Vec<String>, id: u32, message: String| {
        info!(id, "{message}");
        entries.push(ActivityEntry::new(now, Action::Repair, id, message.clone()));
        warnings.push(format!("{message} (auto-repaired)"));
    };

    let mut used: HashSet<u32> = tasks.iter().map(|t| t.id).filter(|id| *id > 0).collect();
    let mut next_free = used
        .iter()
        .copied()
        .max()
        .unwrap_or(0)
        .max(config.next_id.saturating_sub(1))
        + 1;

    // Files without an id adopt their filename prefix when it is free.
    for idx in 0..tasks.len() {
        if tasks[idx].id != 0 {
            continue;
        }
        let path = display_path(&tasks[idx]);
        let id = match tasks[idx].file_path.as_deref().and_then(id_from_filename) {
            Some(id) if !used.contains(&id) => id,
            _ => {
                let id = next_free;
                next_free += 1;
                id
            }
        };
        next_free = next_free.max(id + 1);
        used.insert(id);
        tasks[idx].id = id;
        rewrite.insert(idx);
        note(&mut warnings, id, format!("{path} had no id; assigned #{id}"));
    }

    // Duplicate ids: earliest mtime keeps the id, path order breaks ties.
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, task) in tasks.iter().enumerate() {
        groups.entry(task.id).or_default().push(idx);
    }
    for (id, mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| keep_order(&tasks[*a], &tasks[*b]));
        let kept = display_path(&tasks[group[0]]);
        for idx in group.into_iter().skip(1) {
            let new_id = next_free;
            next_free += 1;
            let path = display_path(&tasks[idx]);
            tasks[idx].id = new_id;
            rewrite.insert(idx);
            note(
                &mut warnings,
                new_id,
                format!("duplicate id #{id} in {kept} and {path}; {path} renumbered to #{new_id}"),
            );
        }
    }

    // Frontmatter wins over the filename prefix.
    for (idx, task) in tasks.iter().enumerate() {
        if rewrite.contains(&idx) {
            continue;
        }
        let Some(path) = task.file_path.as_deref() else {
            continue;
        };
        if id_from_filename(path) != Some(task.id) {
            rewrite.insert(idx);
            note(
                &mut warnings,
                task.id,
                format!(
                    "{} does not match id #{}; renamed to {}",
                    path.display(),
                    task.id,
                    task.file_name()
                ),
            );
        }
    }

    if !rewrite.is_empty() {
        // A rewritten task must not unlink a path another task is about to own.
        let dir = tasks_dir(root);
        let owned: HashSet<PathBuf> = tasks
            .iter()
            .enumerate()
            .filter_map(|(idx, task)| {
                if rewrite.contains(&idx) {
                    Some(dir.join(task.file_name()))
                } else {
                    task.file_path.clone()
                }
            })
            .collect();
        let mut order: Vec<usize> = rewrite.iter().copied().collect();
        order.sort_unstable();
        for idx in order {
            let task = &mut tasks[idx];
            let target = dir.join(task.file_name());
            if task
                .file_path
                .as_ref()
                .map(|old| *old != target && owned.contains(old))
                .unwrap_or(false)
            {
                task.file_path = None;
            }
            write_task(root, task)?;
        }
    }

    let max_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
    if config.next_id <= max_id {
        let old = config.next_id;
        config.next_id = max_id + 1;
        write_config(root, &config)?;
        note(
            &mut warnings,
            0,
            format!("next_id was {old} but highest id is #{max_id}; raised to {}", config.next_id),
        );
    }

    append_entries(root, &entries)?;
    Ok(Repaired {
        config,
        tasks,
        warnings,
    })
}

fn keep_order(a: &Task, b: &Task) -> Ordering {
    match (a.file_mtime, b.file_mtime) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => a.file_path.cmp(&b.file_path),
    }
}

fn display_path(task: &Task) -> String {
    task.file_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("#{}", task.id))
}
