mod render;
mod version;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use kanban_core::activity::{query_log, read_log, Action, LogQuery};
use kanban_core::apply::{
    Applied, CreateInput, EditInput, HandoffInput, PickInput, Workspace, WriteOptions,
};
use kanban_core::config::{BoardConfig, ARCHIVED_STATUS};
use kanban_core::store::{init_board, resolve_root, DEFAULT_BOARD_DIR};
use kanban_core::transition::MoveTarget;
use kanban_core::validate::{parse_task_id, parse_task_ids, parse_timestamp, split_list};
use kanban_core::views::{
    board_summary, context_markdown, filter_tasks, group_tasks, metrics, task_to_json_value,
    write_context, ListQuery,
};
use kanban_core::KanbanError;

/// File-backed Kanban board for humans and agents.
#[derive(Parser)]
#[command(name = "kanban", about = "File-backed Kanban board", version = version::SHORT, long_version = version::LONG)]
struct Cli {
    /// Board directory (defaults to searching upward from the current directory)
    #[arg(long, global = true, env = "KANBAN_DIR")]
    dir: Option<PathBuf>,

    /// Print JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print tables
    #[arg(long, global = true)]
    table: bool,

    /// Print one line per task
    #[arg(long, global = true, visible_alias = "oneline")]
    compact: bool,

    /// Default output format when no format flag is given
    #[arg(long, global = true, env = "KANBAN_OUTPUT", value_enum, hide = true)]
    output: Option<OutputFormat>,

    /// Override WIP limits and claims
    #[arg(long, global = true)]
    force: bool,

    /// Confirm destructive operations
    #[arg(long, global = true)]
    yes: bool,

    /// Claim the task for AGENT (or refresh an existing claim)
    #[arg(long, global = true, value_name = "AGENT")]
    claim: Option<String>,

    /// Release the claim on the task
    #[arg(long, global = true)]
    release: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Compact,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new board
    Init(InitArgs),
    /// Create a task
    Create(CreateArgs),
    /// List tasks
    List(ListArgs),
    /// Show one task
    Show {
        id: String,
    },
    /// Edit one or more tasks (comma separated ids)
    Edit(EditArgs),
    /// Move tasks to another status
    Move {
        ids: String,
        status: Option<String>,
        #[arg(long)]
        next: bool,
        #[arg(long)]
        prev: bool,
    },
    /// Archive tasks
    Archive {
        ids: String,
    },
    /// Soft-delete tasks (requires --yes)
    Delete {
        ids: String,
    },
    /// Hand a claimed task over for review
    Handoff {
        id: String,
        #[arg(long)]
        note: Option<String>,
        /// Prefix the note with the current time
        #[arg(long)]
        timestamp: bool,
        #[arg(long, value_name = "REASON")]
        block: Option<String>,
    },
    /// Claim the next available task
    Pick {
        /// Only consider these statuses (comma separated)
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Move the picked task to this status
        #[arg(long = "move", value_name = "STATUS")]
        move_to: Option<String>,
    },
    /// Summarize the board by column
    Board,
    /// Flow metrics
    Metrics {
        #[arg(long)]
        since: Option<String>,
    },
    /// Show the activity log
    Log {
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Read or change board configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Render a markdown context snapshot for agents
    Context {
        /// Write the snapshot into this file between marker comments
        #[arg(long, value_name = "PATH")]
        write_to: Option<PathBuf>,
        /// Window for recently completed work
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Ordered statuses (comma separated); `archived` is appended
    #[arg(long)]
    statuses: Option<String>,
    /// Column limit as STATUS:N (repeatable)
    #[arg(long = "wip-limit", value_name = "STATUS:N")]
    wip_limits: Vec<String>,
}

#[derive(Args)]
struct CreateArgs {
    title: String,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    tags: Option<String>,
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    estimate: Option<String>,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    depends_on: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    blocked: bool,
    #[arg(long)]
    not_blocked: bool,
    /// Only tasks whose dependencies are all resolved
    #[arg(long)]
    unblocked: bool,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    claimed_by: Option<String>,
    #[arg(long)]
    unclaimed: bool,
    #[arg(long)]
    search: Option<String>,
    /// Include archived tasks
    #[arg(long)]
    archived: bool,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    reverse: bool,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    group_by: Option<String>,
}

#[derive(Args)]
struct EditArgs {
    ids: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    clear_assignee: bool,
    #[arg(long = "add-tag")]
    add_tags: Vec<String>,
    #[arg(long = "remove-tag")]
    remove_tags: Vec<String>,
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    clear_due: bool,
    #[arg(long)]
    estimate: Option<String>,
    #[arg(long)]
    clear_estimate: bool,
    #[arg(long)]
    body: Option<String>,
    #[arg(long)]
    append_body: Option<String>,
    /// Prefix appended text with the current time
    #[arg(long)]
    timestamp: bool,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    clear_parent: bool,
    /// Replace the dependency list (comma separated ids)
    #[arg(long)]
    depends_on: Option<String>,
    #[arg(long = "add-dep")]
    add_deps: Vec<String>,
    #[arg(long = "remove-dep")]
    remove_deps: Vec<String>,
    #[arg(long, value_name = "REASON")]
    block: Option<String>,
    #[arg(long)]
    unblock: bool,
    #[arg(long)]
    started: Option<String>,
    #[arg(long)]
    clear_started: bool,
    #[arg(long)]
    completed: Option<String>,
    #[arg(long)]
    clear_completed: bool,
}

/// Rendered result of one command.
struct Report {
    json: Value,
    table: String,
    compact: Option<String>,
    failed: bool,
}

impl Report {
    fn new(json: Value, table: String) -> Self {
        Self {
            json,
            table,
            compact: None,
            failed: false,
        }
    }

    fn with_compact(mut self, compact: String) -> Self {
        self.compact = Some(compact);
        self
    }
}

impl Cli {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.compact {
            OutputFormat::Compact
        } else if self.table {
            OutputFormat::Table
        } else {
            self.output.unwrap_or(OutputFormat::Table)
        }
    }

    fn write_options(&self) -> WriteOptions<'_> {
        WriteOptions {
            claim: self.claim.as_deref().map(str::trim).filter(|a| !a.is_empty()),
            release: self.release,
            force: self.force,
            yes: self.yes,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KANBAN_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    let format = cli.format();
    let mut warnings = Vec::new();
    let result = run(&cli, &mut warnings);
    for warning in &warnings {
        eprintln!("Warning: {warning}");
    }
    match result {
        Ok(report) => {
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&report.json).unwrap_or_else(|_| "null".to_string())
                ),
                OutputFormat::Compact => print!("{}", report.compact.as_ref().unwrap_or(&report.table)),
                OutputFormat::Table => print!("{}", report.table),
            }
            if report.failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            match err.downcast_ref::<KanbanError>() {
                Some(structured) if format == OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&structured.to_json())
                            .unwrap_or_else(|_| "null".to_string())
                    );
                }
                Some(structured) => eprintln!("Error: {structured}"),
                None if format == OutputFormat::Json => {
                    println!("{}", json!({ "error": format!("{err:#}"), "code": "IO_ERROR" }));
                }
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::from(1)
        }
    }
}

fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(0).unwrap_or(now)
}

fn run(cli: &Cli, warnings: &mut Vec<String>) -> Result<Report> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    if let Command::Init(args) = &cli.command {
        return Ok(init(cli, args, &cwd)?);
    }
    let root = resolve_root(cli.dir.as_deref(), &cwd)?;
    debug!(root = %root.display(), "resolved board");
    let mut ws = Workspace::open(&root, now())?;
    let result = dispatch(cli, &mut ws);
    warnings.extend(ws.take_warnings());
    Ok(result?)
}

fn dispatch(cli: &Cli, ws: &mut Workspace) -> Result<Report, KanbanError> {
    let opts = cli.write_options();
    match &cli.command {
        Command::Init(_) => Err(KanbanError::invalid(format!(
            "board already initialized at {}",
            ws.root().display()
        ))),
        Command::Create(args) => {
            let input = CreateInput {
                title: args.title.clone(),
                status: args.status.clone(),
                priority: args.priority.clone(),
                class: args.class.clone(),
                assignee: args.assignee.clone(),
                tags: args.tags.as_deref().map(split_list).unwrap_or_default(),
                due: args.due.clone(),
                estimate: args.estimate.clone(),
                body: args.body.clone(),
                parent: args.parent.as_deref().map(parse_task_id).transpose()?,
                depends_on: args
                    .depends_on
                    .as_deref()
                    .map(parse_task_ids)
                    .transpose()?
                    .unwrap_or_default(),
            };
            let applied = ws.create(input, &opts)?;
            Ok(applied_report(ws, &applied, "Created"))
        }
        Command::List(args) => list(ws, args),
        Command::Show { id } => {
            let id = parse_task_id(id)?;
            let board = ws.board();
            let task = board.require(id)?;
            let mut json = task_to_json_value(task, board, ws.now(), true);
            if let Value::Object(map) = &mut json {
                map.insert("children".to_string(), json!(board.children(id)));
                map.insert("dependents".to_string(), json!(board.dependents(id)));
                map.insert(
                    "open_dependencies".to_string(),
                    json!(board.open_dependencies(task)),
                );
            }
            let table = render::task_detail(task, board, ws.now());
            Ok(Report::new(json, table).with_compact(render::task_lines(&[task])))
        }
        Command::Edit(args) => {
            let ids = parse_task_ids(&args.ids)?;
            let input = edit_input(args)?;
            let results = ws.batch(&ids, |ws, id| ws.edit(id, &input, &opts));
            batch_report(ws, results, "Updated")
        }
        Command::Move {
            ids,
            status,
            next,
            prev,
        } => {
            let ids = parse_task_ids(ids)?;
            let target = match (status, next, prev) {
                (Some(_), true, _) | (Some(_), _, true) | (None, true, true) => {
                    return Err(KanbanError::StatusConflict(
                        "give exactly one of STATUS, --next or --prev".to_string(),
                    ))
                }
                (Some(status), false, false) => MoveTarget::Status(status.clone()),
                (None, true, false) => MoveTarget::Next,
                (None, false, true) => MoveTarget::Prev,
                (None, false, false) => {
                    return Err(KanbanError::invalid(
                        "move needs a target status, --next or --prev",
                    ))
                }
            };
            let results = ws.batch(&ids, |ws, id| ws.move_task(id, &target, &opts));
            batch_report(ws, results, "Moved")
        }
        Command::Archive { ids } => {
            let ids = parse_task_ids(ids)?;
            let results = ws.batch(&ids, |ws, id| ws.archive(id, &opts));
            batch_report(ws, results, "Archived")
        }
        Command::Delete { ids } => {
            let ids = parse_task_ids(ids)?;
            if !opts.yes {
                return Err(KanbanError::ConfirmationRequired(format!(
                    "deleting {}",
                    ids.iter().map(|id| format!("#{id}")).collect::<Vec<_>>().join(", ")
                )));
            }
            let results = ws.batch(&ids, |ws, id| ws.delete(id, &opts));
            batch_report(ws, results, "Deleted")
        }
        Command::Handoff {
            id,
            note,
            timestamp,
            block,
        } => {
            let id = parse_task_id(id)?;
            let input = HandoffInput {
                note: note.clone(),
                timestamp: *timestamp,
                block: block.clone(),
            };
            let applied = ws.handoff(id, &input, &opts)?;
            Ok(applied_report(ws, &applied, "Handed off"))
        }
        Command::Pick {
            status,
            tag,
            move_to,
        } => {
            let input = PickInput {
                statuses: status.as_deref().map(split_list).unwrap_or_default(),
                tag: tag.clone(),
                move_to: move_to.clone(),
            };
            let applied = ws.pick(&input, &opts)?;
            Ok(applied_report(ws, &applied, "Picked"))
        }
        Command::Board => {
            let summary = board_summary(ws.board(), ws.now());
            let json = serde_json::to_value(&summary).unwrap_or(Value::Null);
            Ok(Report::new(json, render::board_table(&summary)))
        }
        Command::Metrics { since } => {
            let since = since.as_deref().map(parse_timestamp).transpose()?;
            let metrics = metrics(ws.board(), ws.now(), since);
            let json = serde_json::to_value(&metrics).unwrap_or(Value::Null);
            Ok(Report::new(json, render::metrics_text(&metrics)))
        }
        Command::Log {
            since,
            limit,
            action,
            task,
        } => {
            let query = LogQuery {
                since: since.as_deref().map(parse_timestamp).transpose()?,
                action: action.as_deref().map(Action::parse).transpose()?,
                task: task.as_deref().map(parse_task_id).transpose()?,
                limit: *limit,
            };
            let (entries, skipped) = read_log(ws.root())?;
            let entries = query_log(&entries, &query);
            let mut report = Report::new(
                serde_json::to_value(&entries).unwrap_or(Value::Null),
                render::log_lines(&entries),
            );
            if !skipped.is_empty() {
                report.json = json!({ "entries": report.json, "skipped": skipped });
            }
            Ok(report)
        }
        Command::Config { command } => match command {
            ConfigCommand::Get { key } => {
                let value = ws.config().get_key(key)?;
                let table = match &value {
                    Value::String(s) => format!("{s}\n"),
                    other => format!(
                        "{}\n",
                        serde_json::to_string_pretty(other).unwrap_or_default()
                    ),
                };
                Ok(Report::new(json!({ "key": key, "value": value }), table))
            }
            ConfigCommand::Set { key, value } => {
                let config = ws.config_set(key, value)?;
                let stored = config.get_key(key)?;
                Ok(Report::new(
                    json!({ "key": key, "value": stored }),
                    format!("Set {key} = {value}\n"),
                ))
            }
        },
        Command::Context { write_to, days } => {
            let content = context_markdown(ws.board(), ws.now(), (*days).max(0));
            match write_to {
                Some(path) => {
                    write_context(path, &content)?;
                    Ok(Report::new(
                        json!({ "path": path.display().to_string(), "written": true }),
                        format!("Wrote context to {}\n", path.display()),
                    ))
                }
                None => Ok(Report::new(json!({ "content": content }), content)),
            }
        }
    }
}

fn init(cli: &Cli, args: &InitArgs, cwd: &Path) -> Result<Report, KanbanError> {
    let root = match &cli.dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => cwd.join(DEFAULT_BOARD_DIR),
    };
    let mut config = BoardConfig::default();
    config.board.name = args.name.clone().unwrap_or_else(|| {
        root.parent()
            .and_then(|p| p.file_name())
            .or_else(|| root.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Board".to_string())
    });
    if let Some(description) = &args.description {
        config.board.description = description.clone();
    }
    if let Some(statuses) = &args.statuses {
        config.statuses = split_list(statuses);
        if config.statuses.iter().all(|s| s == ARCHIVED_STATUS) {
            return Err(KanbanError::invalid("--statuses needs at least one working status"));
        }
        config.defaults.status.clear();
        config.normalize();
    }
    for entry in &args.wip_limits {
        let (status, limit) = entry
            .rsplit_once(':')
            .ok_or_else(|| KanbanError::invalid(format!("--wip-limit expects STATUS:N, got {entry:?}")))?;
        config.set_key(&format!("wip_limits.{}", status.trim()), limit)?;
    }
    init_board(&root, &config)?;
    let table = format!("Initialized board {:?} at {}\n", config.board.name, root.display());
    Ok(Report::new(
        json!({
            "root": root.display().to_string(),
            "name": config.board.name,
            "statuses": config.statuses,
        }),
        table,
    ))
}

fn list(ws: &Workspace, args: &ListArgs) -> Result<Report, KanbanError> {
    if args.blocked && args.not_blocked {
        return Err(KanbanError::StatusConflict(
            "--blocked and --not-blocked cannot be combined".to_string(),
        ));
    }
    let query = ListQuery {
        statuses: args.status.as_deref().map(split_list).unwrap_or_default(),
        priorities: args.priority.as_deref().map(split_list).unwrap_or_default(),
        classes: args.class.as_deref().map(split_list).unwrap_or_default(),
        assignee: args.assignee.clone(),
        tag: args.tag.clone(),
        blocked: if args.blocked {
            Some(true)
        } else if args.not_blocked {
            Some(false)
        } else {
            None
        },
        unblocked: args.unblocked,
        parent: args.parent.as_deref().map(parse_task_id).transpose()?,
        claimed_by: args.claimed_by.clone(),
        unclaimed: args.unclaimed,
        search: args.search.clone(),
        archived: args.archived,
        sort: args.sort.clone(),
        reverse: args.reverse,
        limit: args.limit,
    };
    let board = ws.board();
    let now = ws.now();
    let tasks = filter_tasks(board, &query, now)?;
    let Some(field) = &args.group_by else {
        let json = Value::Array(
            tasks
                .iter()
                .map(|task| task_to_json_value(task, board, now, false))
                .collect(),
        );
        return Ok(Report::new(json, render::task_table(&tasks, board, now))
            .with_compact(render::task_lines(&tasks)));
    };
    let groups = group_tasks(&board.config, &tasks, field)?;
    let mut json = Vec::new();
    let mut table = String::new();
    let mut compact = String::new();
    for (key, members) in &groups {
        json.push(json!({
            "group": key,
            "count": members.len(),
            "tasks": members
                .iter()
                .map(|task| task_to_json_value(task, board, now, false))
                .collect::<Vec<_>>(),
        }));
        table.push_str(&format!("== {key} ({}) ==\n", members.len()));
        table.push_str(&render::task_table(members, board, now));
        table.push('\n');
        compact.push_str(&format!("{key}:\n"));
        compact.push_str(&render::task_lines(members));
    }
    if groups.is_empty() {
        table.push_str("No tasks found.\n");
    }
    Ok(Report::new(Value::Array(json), table).with_compact(compact))
}

fn edit_input(args: &EditArgs) -> Result<EditInput, KanbanError> {
    let ids = |values: &[String]| -> Result<Vec<u32>, KanbanError> {
        let mut out = Vec::new();
        for value in values {
            out.extend(parse_task_ids(value)?);
        }
        Ok(out)
    };
    let tags = |values: &[String]| values.iter().flat_map(|v| split_list(v)).collect::<Vec<_>>();
    Ok(EditInput {
        title: args.title.clone(),
        status: args.status.clone(),
        priority: args.priority.clone(),
        class: args.class.clone(),
        assignee: args.assignee.clone(),
        clear_assignee: args.clear_assignee,
        add_tags: tags(&args.add_tags),
        remove_tags: tags(&args.remove_tags),
        due: args.due.clone(),
        clear_due: args.clear_due,
        estimate: args.estimate.clone(),
        clear_estimate: args.clear_estimate,
        body: args.body.clone(),
        append_body: args.append_body.clone(),
        timestamp: args.timestamp,
        parent: args.parent.as_deref().map(parse_task_id).transpose()?,
        clear_parent: args.clear_parent,
        depends_on: args.depends_on.as_deref().map(parse_task_ids).transpose()?,
        add_deps: ids(&args.add_deps)?,
        remove_deps: ids(&args.remove_deps)?,
        block: args.block.clone(),
        unblock: args.unblock,
        started: args.started.clone(),
        clear_started: args.clear_started,
        completed: args.completed.clone(),
        clear_completed: args.clear_completed,
    })
}

fn applied_json(ws: &Workspace, applied: &Applied) -> Value {
    let mut json = task_to_json_value(&applied.task, ws.board(), ws.now(), false);
    if let Value::Object(map) = &mut json {
        map.insert("changed".to_string(), Value::Bool(applied.changed));
    }
    json
}

fn applied_report(ws: &Workspace, applied: &Applied, verb: &str) -> Report {
    let task = &applied.task;
    let table = if applied.changed {
        format!("{verb} task #{}: {} [{}]\n", task.id, task.title, task.status)
    } else {
        format!("Task #{} unchanged [{}]\n", task.id, task.status)
    };
    Report::new(applied_json(ws, applied), table)
        .with_compact(render::task_lines(&[task]))
}

/// A single id keeps the plain shape; several ids report one entry each and
/// fail the command if any id failed.
fn batch_report(
    ws: &Workspace,
    results: Vec<(u32, Result<Applied, KanbanError>)>,
    verb: &str,
) -> Result<Report, KanbanError> {
    if results.len() == 1 {
        let (_, result) = results.into_iter().next().ok_or(KanbanError::NoChanges)?;
        let applied = result?;
        return Ok(applied_report(ws, &applied, verb));
    }
    let mut json = Vec::new();
    let mut table = String::new();
    let mut failed = false;
    for (id, result) in &results {
        match result {
            Ok(applied) => {
                let mut entry = Map::new();
                entry.insert("id".to_string(), json!(id));
                entry.insert("ok".to_string(), Value::Bool(true));
                entry.insert("changed".to_string(), Value::Bool(applied.changed));
                entry.insert("task".to_string(), applied_json(ws, applied));
                json.push(Value::Object(entry));
                table.push_str(&applied_report(ws, applied, verb).table);
            }
            Err(err) => {
                failed = true;
                json.push(json!({
                    "id": id,
                    "ok": false,
                    "error": err.to_string(),
                    "code": err.code(),
                }));
                table.push_str(&format!("Task #{id}: error: {err}\n"));
            }
        }
    }
    let mut report = Report::new(Value::Array(json), table);
    report.failed = failed;
    Ok(report)
}
