//! The single-writer apply pipeline: every mutating command runs
//! load, repair, validate, authorize, compute, enforce, persist and log
//! inside one locked [`Workspace`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::activity::{append_entries, Action, ActivityEntry};
use crate::board::Board;
use crate::claim::{apply_claim, authorize, is_active_claim, ClaimEffect, ClaimRequest};
use crate::config::{write_config, BoardConfig, ARCHIVED_STATUS};
use crate::deps::{dependents_warning, validate_dependencies, validate_parent};
use crate::error::{KanbanError, Result};
use crate::repair::repair;
use crate::store::{load_all, write_task, BoardLock};
use crate::task::Task;
use crate::transition::{apply_status, check_wip, plan_move, MoveTarget};
use crate::validate::{
    format_timestamp, normalize_tags, parse_date, parse_timestamp, require_class,
    require_estimate, require_priority, require_title, require_working_status,
};

/// Global write modifiers shared by every mutating command.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions<'a> {
    pub claim: Option<&'a str>,
    pub release: bool,
    pub force: bool,
    pub yes: bool,
}

impl<'a> WriteOptions<'a> {
    fn claim_request(&self) -> ClaimRequest<'a> {
        ClaimRequest {
            agent: self.claim,
            release: self.release,
            force: self.force,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Applied {
    pub task: Task,
    pub changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub title: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub class: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub due: Option<String>,
    pub estimate: Option<String>,
    pub body: Option<String>,
    pub parent: Option<u32>,
    pub depends_on: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct EditInput {
    pub title: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub class: Option<String>,
    pub assignee: Option<String>,
    pub clear_assignee: bool,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub due: Option<String>,
    pub clear_due: bool,
    pub estimate: Option<String>,
    pub clear_estimate: bool,
    pub body: Option<String>,
    pub append_body: Option<String>,
    pub timestamp: bool,
    pub parent: Option<u32>,
    pub clear_parent: bool,
    pub depends_on: Option<Vec<u32>>,
    pub add_deps: Vec<u32>,
    pub remove_deps: Vec<u32>,
    pub block: Option<String>,
    pub unblock: bool,
    pub started: Option<String>,
    pub clear_started: bool,
    pub completed: Option<String>,
    pub clear_completed: bool,
}

impl EditInput {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.class.is_none()
            && self.assignee.is_none()
            && !self.clear_assignee
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
            && self.due.is_none()
            && !self.clear_due
            && self.estimate.is_none()
            && !self.clear_estimate
            && self.body.is_none()
            && self.append_body.is_none()
            && self.parent.is_none()
            && !self.clear_parent
            && self.depends_on.is_none()
            && self.add_deps.is_empty()
            && self.remove_deps.is_empty()
            && self.block.is_none()
            && !self.unblock
            && self.started.is_none()
            && !self.clear_started
            && self.completed.is_none()
            && !self.clear_completed
    }

    pub fn check_conflicts(&self) -> Result<()> {
        let pairs = [
            (self.block.is_some(), self.unblock, "--block", "--unblock"),
            (self.due.is_some(), self.clear_due, "--due", "--clear-due"),
            (self.started.is_some(), self.clear_started, "--started", "--clear-started"),
            (
                self.completed.is_some(),
                self.clear_completed,
                "--completed",
                "--clear-completed",
            ),
            (self.parent.is_some(), self.clear_parent, "--parent", "--clear-parent"),
            (
                self.assignee.is_some(),
                self.clear_assignee,
                "--assignee",
                "--clear-assignee",
            ),
            (
                self.estimate.is_some(),
                self.clear_estimate,
                "--estimate",
                "--clear-estimate",
            ),
            (self.body.is_some(), self.append_body.is_some(), "--body", "--append-body"),
        ];
        for (left, right, a, b) in pairs {
            if left && right {
                return Err(KanbanError::StatusConflict(format!(
                    "{a} and {b} cannot be combined"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandoffInput {
    pub note: Option<String>,
    pub timestamp: bool,
    pub block: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PickInput {
    pub statuses: Vec<String>,
    pub tag: Option<String>,
    pub move_to: Option<String>,
}

/// A locked, repaired board ready to accept mutations.
pub struct Workspace {
    root: PathBuf,
    board: Board,
    now: DateTime<Utc>,
    warnings: Vec<String>,
    _lock: BoardLock,
}

impl Workspace {
    pub fn open(root: &Path, now: DateTime<Utc>) -> Result<Self> {
        let lock = BoardLock::acquire(root)?;
        let loaded = load_all(root)?;
        let repaired = repair(root, loaded, now)?;
        debug!(root = %root.display(), tasks = repaired.tasks.len(), "opened workspace");
        Ok(Self {
            root: root.to_path_buf(),
            board: Board::new(repaired.config, repaired.tasks),
            now,
            warnings: repaired.warnings,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn config(&self) -> &BoardConfig {
        &self.board.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Warnings gathered since the last call, in the order they arose.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn timeout(&self) -> chrono::Duration {
        self.board.config.claim_timeout()
    }

    fn entry(&self, action: Action, id: u32, detail: impl Into<String>, opts: &WriteOptions<'_>) -> ActivityEntry {
        ActivityEntry::new(self.now, action, id, detail).with_agent(opts.claim)
    }

    /// Persist the task, update the model, then append the log entries.
    fn commit(&mut self, mut task: Task, entries: Vec<ActivityEntry>) -> Result<Task> {
        write_task(&self.root, &mut task)?;
        self.board.upsert(task.clone());
        append_entries(&self.root, &entries)?;
        Ok(task)
    }

    fn claim_entries(&self, id: u32, effect: &ClaimEffect, opts: &WriteOptions<'_>) -> Vec<ActivityEntry> {
        match effect {
            ClaimEffect::Claimed(agent) => vec![ActivityEntry::new(
                self.now,
                Action::Claim,
                id,
                format!("claimed by {agent}"),
            )
            .with_agent(Some(agent.as_str()))],
            ClaimEffect::Released(agent) => vec![self.entry(
                Action::Release,
                id,
                format!("released claim held by {agent}"),
                opts,
            )],
            ClaimEffect::ExpiredCleared(agent) => vec![self.entry(
                Action::Release,
                id,
                format!("cleared expired claim held by {agent}"),
                opts,
            )],
            ClaimEffect::Refreshed(_) | ClaimEffect::None => Vec::new(),
        }
    }

    pub fn create(&mut self, input: CreateInput, opts: &WriteOptions<'_>) -> Result<Applied> {
        let config = &self.board.config;
        let title = require_title(&input.title)?;
        let status = match input.status.as_deref() {
            Some(status) => require_working_status(config, status)?,
            None => config.defaults.status.clone(),
        };
        let priority = match input.priority.as_deref() {
            Some(priority) => require_priority(config, priority)?,
            None => config.defaults.priority.clone(),
        };
        let class = match input.class.as_deref() {
            Some(class) => require_class(config, class)?,
            None => config.defaults.class.clone(),
        };
        let tags = normalize_tags(&input.tags)?;
        let due = input.due.as_deref().map(parse_date).transpose()?;
        let estimate = input.estimate.as_deref().map(require_estimate).transpose()?;
        if let Some(parent) = input.parent {
            validate_parent(&self.board, 0, parent)?;
        }
        validate_dependencies(&self.board, 0, &input.depends_on)?;

        let id = config.next_id.max(self.board.max_id() + 1);
        let mut task = Task::new(id, &title, self.now);
        task.priority = priority;
        task.class = class;
        task.assignee = input.assignee.unwrap_or_default().trim().to_string();
        task.tags = tags;
        task.due = due;
        task.estimate = estimate;
        task.body = input.body.unwrap_or_default();
        task.parent = input.parent;
        task.depends_on = dedup_ids(&input.depends_on);
        task.status = config.initial_status().to_string();
        apply_status(config, &mut task, &status, self.now);

        let wip_warnings = check_wip(&self.board, &task, &status, opts.force)?;
        self.warnings.extend(wip_warnings);
        let effect = apply_claim(&mut task, &opts.claim_request(), self.now, self.timeout());

        let mut entries = vec![self.entry(Action::Create, id, format!("created in {status}"), opts)];
        entries.extend(self.claim_entries(id, &effect, opts));

        write_task(&self.root, &mut task)?;
        let mut config = self.board.config.clone();
        config.next_id = id + 1;
        write_config(&self.root, &config)?;
        self.board.config = config;
        self.board.upsert(task.clone());
        append_entries(&self.root, &entries)?;
        Ok(Applied {
            task,
            changed: true,
        })
    }

    pub fn edit(&mut self, id: u32, input: &EditInput, opts: &WriteOptions<'_>) -> Result<Applied> {
        input.check_conflicts()?;
        let request = opts.claim_request();
        if input.is_empty() && request.is_empty() {
            return Err(KanbanError::NoChanges);
        }
        let current = self.board.require(id)?.clone();
        authorize(&current, &request, self.now, self.timeout())?;
        let config = &self.board.config;
        let mut next = current.clone();

        if let Some(title) = &input.title {
            next.title = require_title(title)?;
        }
        if let Some(priority) = &input.priority {
            next.priority = require_priority(config, priority)?;
        }
        if let Some(class) = &input.class {
            next.class = require_class(config, class)?;
        }
        if let Some(assignee) = &input.assignee {
            next.assignee = assignee.trim().to_string();
        }
        if input.clear_assignee {
            next.assignee.clear();
        }
        if !input.add_tags.is_empty() {
            let merged: Vec<String> = next.tags.iter().chain(input.add_tags.iter()).cloned().collect();
            next.tags = normalize_tags(&merged)?;
        }
        if !input.remove_tags.is_empty() {
            next.tags.retain(|tag| !input.remove_tags.iter().any(|r| r.trim() == tag));
        }
        if let Some(due) = &input.due {
            next.due = Some(parse_date(due)?);
        }
        if input.clear_due {
            next.due = None;
        }
        if let Some(estimate) = &input.estimate {
            next.estimate = Some(require_estimate(estimate)?);
        }
        if input.clear_estimate {
            next.estimate = None;
        }
        if let Some(body) = &input.body {
            next.body = body.clone();
        }
        if let Some(extra) = &input.append_body {
            next.body = append_note(&next.body, extra, input.timestamp.then_some(self.now));
        }
        if let Some(parent) = input.parent {
            validate_parent(&self.board, id, parent)?;
            next.parent = Some(parent);
        }
        if input.clear_parent {
            next.parent = None;
        }
        if let Some(deps) = &input.depends_on {
            validate_dependencies(&self.board, id, deps)?;
            next.depends_on = dedup_ids(deps);
        }
        if !input.add_deps.is_empty() {
            validate_dependencies(&self.board, id, &input.add_deps)?;
            for dep in &input.add_deps {
                if !next.depends_on.contains(dep) {
                    next.depends_on.push(*dep);
                }
            }
        }
        if !input.remove_deps.is_empty() {
            next.depends_on.retain(|dep| !input.remove_deps.contains(dep));
        }
        if let Some(reason) = &input.block {
            next.blocked = true;
            next.block_reason = reason.trim().to_string();
        }
        if input.unblock {
            next.blocked = false;
            next.block_reason.clear();
        }

        let mut moved = None;
        if let Some(status) = &input.status {
            let status = require_working_status(config, status)?;
            let (planned, outcome) = plan_move(
                &self.board,
                &next,
                &MoveTarget::Status(status),
                opts.force,
                self.now,
            )?;
            next = planned;
            if outcome.changed {
                self.warnings.extend(outcome.warnings);
                moved = Some((outcome.from, outcome.to));
            }
        } else if next.class != current.class {
            let warnings = check_wip(&self.board, &next, &next.status, opts.force)?;
            self.warnings.extend(warnings);
        }

        let config = &self.board.config;
        if let Some(started) = &input.started {
            next.started = Some(parse_timestamp(started)?);
        }
        if input.clear_started {
            next.started = None;
        }
        if let Some(completed) = &input.completed {
            if !config.is_terminal(&next.status) && !BoardConfig::is_archived(&next.status) {
                return Err(KanbanError::invalid(format!(
                    "--completed requires the task to be in {}",
                    config.terminal_status()
                )));
            }
            next.completed = Some(parse_timestamp(completed)?);
        }
        if input.clear_completed {
            if config.is_terminal(&next.status) {
                return Err(KanbanError::invalid(format!(
                    "--clear-completed is not allowed while the task is in {}",
                    next.status
                )));
            }
            next.completed = None;
        }

        let fields = changed_fields(&current, &next);
        let effect = apply_claim(&mut next, &request, self.now, self.timeout());
        let claim_changed = matches!(
            effect,
            ClaimEffect::Claimed(_) | ClaimEffect::Released(_) | ClaimEffect::ExpiredCleared(_)
        ) || (matches!(effect, ClaimEffect::Refreshed(_)) && input.is_empty());
        if fields.is_empty() && !claim_changed {
            return Ok(Applied {
                task: current,
                changed: false,
            });
        }
        if !fields.is_empty() {
            next.updated = self.now;
        }

        let mut entries = Vec::new();
        let edited: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| !matches!(*f, "status" | "blocked" | "block_reason"))
            .collect();
        if !edited.is_empty() {
            entries.push(self.entry(Action::Edit, id, format!("changed {}", edited.join(", ")), opts));
        }
        if let Some((from, to)) = &moved {
            entries.push(self.entry(Action::Move, id, format!("{from} -> {to}"), opts));
        }
        if next.blocked && !current.blocked {
            entries.push(self.entry(Action::Block, id, next.block_reason.clone(), opts));
        } else if !next.blocked && current.blocked {
            entries.push(self.entry(Action::Unblock, id, "unblocked", opts));
        } else if next.blocked && next.block_reason != current.block_reason {
            entries.push(self.entry(Action::Block, id, next.block_reason.clone(), opts));
        }
        entries.extend(self.claim_entries(id, &effect, opts));
        if let ClaimEffect::Refreshed(agent) = &effect {
            if input.is_empty() {
                entries.push(self.entry(Action::Claim, id, format!("refreshed by {agent}"), opts));
            }
        }

        let task = self.commit(next, entries)?;
        Ok(Applied {
            task,
            changed: true,
        })
    }

    pub fn move_task(&mut self, id: u32, target: &MoveTarget, opts: &WriteOptions<'_>) -> Result<Applied> {
        let current = self.board.require(id)?.clone();
        let request = opts.claim_request();
        authorize(&current, &request, self.now, self.timeout())?;
        if let MoveTarget::Status(status) = target {
            if BoardConfig::is_archived(status.trim()) {
                return self.archive_as(id, Action::Archive, opts);
            }
        }
        let (mut next, outcome) = plan_move(&self.board, &current, target, opts.force, self.now)?;
        let effect = apply_claim(&mut next, &request, self.now, self.timeout());
        if !outcome.changed && matches!(effect, ClaimEffect::None) {
            return Ok(Applied {
                task: current,
                changed: false,
            });
        }
        self.warnings.extend(outcome.warnings);
        let mut entries = Vec::new();
        if outcome.changed {
            entries.push(self.entry(
                Action::Move,
                id,
                format!("{} -> {}", outcome.from, outcome.to),
                opts,
            ));
        }
        entries.extend(self.claim_entries(id, &effect, opts));
        let task = self.commit(next, entries)?;
        Ok(Applied {
            task,
            changed: outcome.changed,
        })
    }

    pub fn archive(&mut self, id: u32, opts: &WriteOptions<'_>) -> Result<Applied> {
        let current = self.board.require(id)?;
        authorize(current, &opts.claim_request(), self.now, self.timeout())?;
        self.archive_as(id, Action::Archive, opts)
    }

    /// Soft delete: the same transition as archive, logged as `delete`.
    pub fn delete(&mut self, id: u32, opts: &WriteOptions<'_>) -> Result<Applied> {
        if !opts.yes {
            return Err(KanbanError::ConfirmationRequired(format!("deleting task #{id}")));
        }
        let current = self.board.require(id)?;
        authorize(current, &opts.claim_request(), self.now, self.timeout())?;
        self.archive_as(id, Action::Delete, opts)
    }

    fn archive_as(&mut self, id: u32, action: Action, opts: &WriteOptions<'_>) -> Result<Applied> {
        let current = self.board.require(id)?.clone();
        let (mut next, outcome) = plan_move(
            &self.board,
            &current,
            &MoveTarget::Status(ARCHIVED_STATUS.to_string()),
            opts.force,
            self.now,
        )?;
        if !outcome.changed {
            return Ok(Applied {
                task: current,
                changed: false,
            });
        }
        if let Some(warning) = dependents_warning(&self.board, id) {
            self.warnings.push(warning);
        }
        self.warnings.extend(outcome.warnings);
        let effect = apply_claim(&mut next, &opts.claim_request(), self.now, self.timeout());
        let mut entries = vec![self.entry(action, id, format!("{} -> {}", outcome.from, outcome.to), opts)];
        entries.extend(self.claim_entries(id, &effect, opts));
        let task = self.commit(next, entries)?;
        Ok(Applied {
            task,
            changed: true,
        })
    }

    /// Record a note for the next agent and move the task to review when the
    /// board has that column.
    pub fn handoff(&mut self, id: u32, input: &HandoffInput, opts: &WriteOptions<'_>) -> Result<Applied> {
        let Some(agent) = opts.claim else {
            return Err(KanbanError::ClaimRequired("handoff".to_string()));
        };
        let current = self.board.require(id)?.clone();
        let request = opts.claim_request();
        authorize(&current, &request, self.now, self.timeout())?;

        let mut next = current.clone();
        let mut detail = vec![format!("handed off by {agent}")];
        if let Some(note) = input.note.as_deref().filter(|n| !n.trim().is_empty()) {
            next.body = append_note(&next.body, note, input.timestamp.then_some(self.now));
            detail.push("note added".to_string());
        }
        let mut moved = None;
        let config = &self.board.config;
        if config.has_status("review") && !config.is_resolved(&next.status) && next.status != "review" {
            let (planned, outcome) = plan_move(
                &self.board,
                &next,
                &MoveTarget::Status("review".to_string()),
                opts.force,
                self.now,
            )?;
            next = planned;
            self.warnings.extend(outcome.warnings);
            moved = Some((outcome.from, outcome.to));
        }
        if let Some(reason) = &input.block {
            next.blocked = true;
            next.block_reason = reason.trim().to_string();
            detail.push(format!("blocked: {}", next.block_reason));
        }
        let effect = apply_claim(&mut next, &request, self.now, self.timeout());
        next.updated = self.now;

        let mut entries = vec![self.entry(Action::Handoff, id, detail.join("; "), opts)];
        if let Some((from, to)) = moved {
            entries.push(self.entry(Action::Move, id, format!("{from} -> {to}"), opts));
        }
        if next.blocked && !current.blocked {
            entries.push(self.entry(Action::Block, id, next.block_reason.clone(), opts));
        }
        entries.extend(self.claim_entries(id, &effect, opts));
        let task = self.commit(next, entries)?;
        Ok(Applied {
            task,
            changed: true,
        })
    }

    /// Claim the best available task in one locked load/decide/write cycle.
    pub fn pick(&mut self, input: &PickInput, opts: &WriteOptions<'_>) -> Result<Applied> {
        let Some(agent) = opts.claim else {
            return Err(KanbanError::ClaimRequired("pick".to_string()));
        };
        let config = &self.board.config;
        let mut statuses = Vec::new();
        for status in &input.statuses {
            statuses.push(crate::validate::require_status(config, status)?);
        }
        let move_to = input
            .move_to
            .as_deref()
            .map(|status| require_working_status(config, status))
            .transpose()?;

        let timeout = self.timeout();
        let mut candidates: Vec<&Task> = self
            .board
            .tasks()
            .filter(|t| !BoardConfig::is_archived(&t.status))
            .filter(|t| {
                if statuses.is_empty() {
                    !config.is_terminal(&t.status)
                } else {
                    statuses.contains(&t.status)
                }
            })
            .filter(|t| input.tag.as_ref().map_or(true, |tag| t.tags.contains(tag)))
            .filter(|t| !t.blocked)
            .filter(|t| self.board.is_unblocked(t))
            .filter(|t| !is_active_claim(t, self.now, timeout))
            .collect();
        candidates.sort_by(|a, b| crate::views::pick_order(config, a, b));
        let winner = candidates.first().ok_or(KanbanError::NothingToPick)?;
        let id = winner.id;
        let current = (*winner).clone();
        debug!(id, agent, "picked task");

        let mut next = current.clone();
        let mut entries = Vec::new();
        if let Some(target) = move_to {
            let (planned, outcome) =
                plan_move(&self.board, &next, &MoveTarget::Status(target), opts.force, self.now)?;
            if outcome.changed {
                self.warnings.extend(outcome.warnings);
                entries.push(self.entry(
                    Action::Move,
                    id,
                    format!("{} -> {}", outcome.from, outcome.to),
                    opts,
                ));
            }
            next = planned;
        }
        let request = ClaimRequest {
            agent: Some(agent),
            release: false,
            force: opts.force,
        };
        let effect = apply_claim(&mut next, &request, self.now, timeout);
        next.updated = self.now;
        let mut claims = self.claim_entries(id, &effect, opts);
        if claims.is_empty() {
            claims.push(self.entry(Action::Claim, id, format!("claimed by {agent}"), opts));
        }
        claims.extend(entries);
        let task = self.commit(next, claims)?;
        Ok(Applied {
            task,
            changed: true,
        })
    }

    pub fn config_set(&mut self, key: &str, value: &str) -> Result<BoardConfig> {
        let mut config = self.board.config.clone();
        config.set_key(key, value)?;
        config.normalize();
        config
            .validate()
            .map_err(|err| KanbanError::invalid(err.to_string()))?;
        write_config(&self.root, &config)?;
        append_entries(
            &self.root,
            &[ActivityEntry::new(self.now, Action::Config, 0, format!("{key} = {value}"))],
        )?;
        self.board.config = config.clone();
        Ok(config)
    }

    /// Run `op` for each id independently. Earlier successes are kept when a
    /// later id fails.
    pub fn batch<F>(&mut self, ids: &[u32], mut op: F) -> Vec<(u32, Result<Applied>)>
    where
        F: FnMut(&mut Self, u32) -> Result<Applied>,
    {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = op(&mut *self, *id);
            results.push((*id, result));
        }
        results
    }
}

fn dedup_ids(ids: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

fn append_note(body: &str, note: &str, stamp: Option<DateTime<Utc>>) -> String {
    let note = note.trim();
    let line = match stamp {
        Some(at) => format!("[{}] {}", format_timestamp(&at), note),
        None => note.to_string(),
    };
    let body = body.trim_end();
    if body.is_empty() {
        line
    } else {
        format!("{body}\n\n{line}")
    }
}

fn changed_fields(old: &Task, new: &Task) -> Vec<&'static str> {
    let mut fields = Vec::new();
    let mut check = |name: &'static str, differs: bool| {
        if differs {
            fields.push(name);
        }
    };
    check("title", old.title != new.title);
    check("status", old.status != new.status);
    check("priority", old.priority != new.priority);
    check("class", old.class != new.class);
    check("assignee", old.assignee != new.assignee);
    check("tags", old.tags != new.tags);
    check("due", old.due != new.due);
    check("estimate", old.estimate != new.estimate);
    check("body", old.body != new.body);
    check("parent", old.parent != new.parent);
    check("depends_on", old.depends_on != new.depends_on);
    check("blocked", old.blocked != new.blocked);
    check("block_reason", old.block_reason != new.block_reason);
    check("started", old.started != new.started);
    check("completed", old.completed != new.completed);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::read_log;
    use crate::config::load_config;
    use crate::store::init_board;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    fn board(wip: &[(&str, u32)]) -> TempDir {
        let temp = TempDir::new().expect("tempdir");
        let mut config = BoardConfig::default();
        for (status, limit) in wip {
            config.wip_limits.insert(status.to_string(), *limit);
        }
        init_board(temp.path(), &config).expect("init");
        temp
    }

    fn create(ws: &mut Workspace, title: &str) -> u32 {
        let input = CreateInput {
            title: title.to_string(),
            ..CreateInput::default()
        };
        ws.create(input, &WriteOptions::default()).expect("create").task.id
    }

    #[test]
    fn create_allocates_sequential_ids_and_files() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        assert_eq!(create(&mut ws, "First"), 1);
        assert_eq!(create(&mut ws, "Second"), 2);
        let task = ws.board().get(2).unwrap();
        assert_eq!(task.status, "backlog");
        assert_eq!(task.priority, "medium");
        assert_eq!(task.class, "standard");
        assert!(task.file_path.as_ref().unwrap().ends_with("002-second.md"));
        drop(ws);
        assert_eq!(load_config(temp.path()).unwrap().next_id, 3);
    }

    #[test]
    fn edit_without_changes_is_rejected_and_idempotent_tags_do_not_write() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Tagged");
        let err = ws
            .edit(id, &EditInput::default(), &WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "NO_CHANGES");

        let add = EditInput {
            add_tags: vec!["ops".to_string()],
            ..EditInput::default()
        };
        assert!(ws.edit(id, &add, &WriteOptions::default()).unwrap().changed);
        assert!(!ws.edit(id, &add, &WriteOptions::default()).unwrap().changed);

        let remove = EditInput {
            remove_tags: vec!["missing".to_string()],
            ..EditInput::default()
        };
        assert!(!ws.edit(id, &remove, &WriteOptions::default()).unwrap().changed);
    }

    #[test]
    fn edit_flags_conflict() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "x");
        let input = EditInput {
            block: Some("r".to_string()),
            unblock: true,
            ..EditInput::default()
        };
        let err = ws.edit(id, &input, &WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), "STATUS_CONFLICT");
    }

    #[test]
    fn title_edit_renames_file() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Old title");
        let input = EditInput {
            title: Some("New title".to_string()),
            ..EditInput::default()
        };
        let applied = ws.edit(id, &input, &WriteOptions::default()).unwrap();
        let path = applied.task.file_path.unwrap();
        assert!(path.ends_with("001-new-title.md"));
        assert!(!temp.path().join("tasks/001-old-title.md").exists());
    }

    #[test]
    fn claims_gate_writes_until_expiry() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Shared");
        let alice = WriteOptions {
            claim: Some("alice"),
            ..WriteOptions::default()
        };
        ws.move_task(id, &MoveTarget::Next, &alice).unwrap();
        drop(ws);

        let mut ws = Workspace::open(temp.path(), t0() + Duration::minutes(30)).unwrap();
        let bob = WriteOptions {
            claim: Some("bob"),
            ..WriteOptions::default()
        };
        let err = ws.move_task(id, &MoveTarget::Next, &bob).unwrap_err();
        assert_eq!(err.code(), "TASK_CLAIMED");
        let err = ws
            .move_task(id, &MoveTarget::Next, &WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "TASK_CLAIMED");
        drop(ws);

        let mut ws = Workspace::open(temp.path(), t0() + Duration::minutes(61)).unwrap();
        let applied = ws
            .move_task(id, &MoveTarget::Next, &WriteOptions::default())
            .unwrap();
        assert_eq!(applied.task.claimed_by, None);
        assert_eq!(applied.task.status, "in-progress");
    }

    #[test]
    fn archive_and_delete_share_the_sink() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let dep = create(&mut ws, "Dependency");
        let input = CreateInput {
            title: "Waiting".to_string(),
            depends_on: vec![dep],
            ..CreateInput::default()
        };
        ws.create(input, &WriteOptions::default()).unwrap();
        ws.take_warnings();

        let err = ws.delete(dep, &WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), "CONFIRMATION_REQUIRED");
        let yes = WriteOptions {
            yes: true,
            ..WriteOptions::default()
        };
        let applied = ws.delete(dep, &yes).unwrap();
        assert_eq!(applied.task.status, ARCHIVED_STATUS);
        assert!(applied.task.file_path.unwrap().exists());
        assert!(ws.take_warnings()[0].contains("#2"));
        assert!(!ws.archive(dep, &WriteOptions::default()).unwrap().changed);

        let (entries, _) = read_log(temp.path()).unwrap();
        assert_eq!(entries.last().unwrap().action, Action::Delete);
    }

    #[test]
    fn pick_prefers_class_then_priority_and_skips_claimed() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        for (title, priority, class) in [
            ("low std", "low", "standard"),
            ("high std", "high", "standard"),
            ("expedite", "low", "expedite"),
        ] {
            let input = CreateInput {
                title: title.to_string(),
                priority: Some(priority.to_string()),
                class: Some(class.to_string()),
                status: Some("todo".to_string()),
                ..CreateInput::default()
            };
            ws.create(input, &WriteOptions::default()).unwrap();
        }
        let me = WriteOptions {
            claim: Some("me"),
            ..WriteOptions::default()
        };
        let input = PickInput {
            move_to: Some("in-progress".to_string()),
            ..PickInput::default()
        };
        let first = ws.pick(&input, &me).unwrap().task;
        assert_eq!(first.title, "expedite");
        assert_eq!(first.status, "in-progress");
        assert_eq!(first.claimed_by.as_deref(), Some("me"));
        let second = ws.pick(&PickInput::default(), &me).unwrap().task;
        assert_eq!(second.title, "high std");
        let third = ws.pick(&PickInput::default(), &me).unwrap().task;
        assert_eq!(third.title, "low std");
        let err = ws.pick(&PickInput::default(), &me).unwrap_err();
        assert_eq!(err.code(), "NOTHING_TO_PICK");
        let err = ws.pick(&PickInput::default(), &WriteOptions::default()).unwrap_err();
        assert_eq!(err.code(), "CLAIM_REQUIRED");
    }

    #[test]
    fn handoff_appends_note_and_moves_to_review() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Handoff");
        let me = WriteOptions {
            claim: Some("me"),
            release: true,
            ..WriteOptions::default()
        };
        let input = HandoffInput {
            note: Some("tests pass".to_string()),
            timestamp: true,
            block: None,
        };
        let task = ws.handoff(id, &input, &me).unwrap().task;
        assert_eq!(task.status, "review");
        assert_eq!(task.body, "[2026-06-01T08:00:00Z] tests pass");
        assert_eq!(task.claimed_by, None);
        let err = ws
            .handoff(id, &input, &WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), "CLAIM_REQUIRED");
    }

    #[test]
    fn handoff_block_does_not_warn_about_its_own_move() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Stuck");
        ws.take_warnings();
        let me = WriteOptions {
            claim: Some("me"),
            ..WriteOptions::default()
        };
        let input = HandoffInput {
            note: None,
            timestamp: false,
            block: Some("needs creds".to_string()),
        };
        let task = ws.handoff(id, &input, &me).unwrap().task;
        assert_eq!(task.status, "review");
        assert!(task.blocked);
        assert_eq!(task.block_reason, "needs creds");
        let warnings = ws.take_warnings();
        assert!(warnings.iter().all(|w| !w.contains("moved anyway")), "{warnings:?}");
    }

    #[test]
    fn noop_move_by_holder_refreshes_the_claim_on_disk() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        let id = create(&mut ws, "Long job");
        let me = WriteOptions {
            claim: Some("me"),
            ..WriteOptions::default()
        };
        ws.move_task(id, &MoveTarget::Status("todo".into()), &me).unwrap();
        drop(ws);

        let later = t0() + Duration::minutes(45);
        let mut ws = Workspace::open(temp.path(), later).unwrap();
        let applied = ws.move_task(id, &MoveTarget::Status("todo".into()), &me).unwrap();
        assert!(!applied.changed);
        assert_eq!(applied.task.claimed_at, Some(later));
        drop(ws);

        let ws = Workspace::open(temp.path(), later).unwrap();
        assert_eq!(ws.board().get(id).unwrap().claimed_at, Some(later));
    }

    #[test]
    fn batch_keeps_earlier_successes() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        create(&mut ws, "a");
        create(&mut ws, "b");
        let results = ws.batch(&[1, 99, 2], |ws, id| {
            ws.move_task(id, &MoveTarget::Status("todo".to_string()), &WriteOptions::default())
        });
        let codes: Vec<_> = results
            .iter()
            .map(|(id, r)| (*id, r.as_ref().err().map(|e| e.code())))
            .collect();
        assert_eq!(codes, vec![(1, None), (99, Some("TASK_NOT_FOUND")), (2, None)]);
        assert_eq!(ws.board().get(2).unwrap().status, "todo");
    }

    #[test]
    fn config_set_persists_and_logs() {
        let temp = board(&[]);
        let mut ws = Workspace::open(temp.path(), t0()).unwrap();
        ws.config_set("wip_limits.todo", "2").unwrap();
        drop(ws);
        assert_eq!(load_config(temp.path()).unwrap().wip_limit("todo"), Some(2));
        let (entries, _) = read_log(temp.path()).unwrap();
        assert_eq!(entries[0].action, Action::Config);
    }
}
