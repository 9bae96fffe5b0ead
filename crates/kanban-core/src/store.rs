//! On-disk layout of a board and the primitives that read and replace it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::{config_path, load_config, write_config, BoardConfig, ConfigError, CONFIG_FILE};
use crate::error::{IoContext, KanbanError, Result};
use crate::task::{parse_task_file, render_task, Task};

pub const TASKS_DIR: &str = "tasks";
pub const LOCK_FILE: &str = ".kanban.lock";
pub const DEFAULT_BOARD_DIR: &str = "kanban";

pub fn tasks_dir(root: &Path) -> PathBuf {
    root.join(TASKS_DIR)
}

/// Replace `path` with `bytes`: write a sibling temp file, fsync, rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).at_path(parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{}.tmp-{}", name, std::process::id()));
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(KanbanError::io(path, err));
    }
    Ok(())
}

pub fn is_board_root(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).is_file() && tasks_dir(dir).is_dir()
}

/// Find the board for this invocation. An explicit directory wins; otherwise
/// walk up from `cwd` looking for a board root or a `kanban/` child holding one.
pub fn resolve_root(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            cwd.join(dir)
        };
        if is_board_root(&dir) {
            return Ok(dir);
        }
        let nested = dir.join(DEFAULT_BOARD_DIR);
        if is_board_root(&nested) {
            return Ok(nested);
        }
        return Err(KanbanError::invalid(format!(
            "no board found at {}; run `kanban init` first",
            dir.display()
        )));
    }
    for candidate in cwd.ancestors() {
        if is_board_root(candidate) {
            return Ok(candidate.to_path_buf());
        }
        let nested = candidate.join(DEFAULT_BOARD_DIR);
        if is_board_root(&nested) {
            return Ok(nested);
        }
    }
    Err(KanbanError::invalid(format!(
        "no board found in {} or its parents; run `kanban init` first",
        cwd.display()
    )))
}

/// Create the directory layout and write the initial configuration.
pub fn init_board(root: &Path, config: &BoardConfig) -> Result<PathBuf> {
    if config_path(root).exists() {
        return Err(KanbanError::invalid(format!(
            "board already initialized at {}",
            root.display()
        )));
    }
    let tasks = tasks_dir(root);
    fs::create_dir_all(&tasks).at_path(&tasks)?;
    write_config(root, config)?;
    debug!(root = %root.display(), "initialized board");
    Ok(root.to_path_buf())
}

#[derive(Debug, Clone)]
pub struct LoadedBoard {
    pub config: BoardConfig,
    pub tasks: Vec<Task>,
    pub warnings: Vec<String>,
}

pub fn read_config(root: &Path) -> Result<BoardConfig> {
    let path = config_path(root);
    let config = load_config(root).map_err(|err| match err {
        ConfigError::Io(source) => KanbanError::io(&path, source),
        ConfigError::Parse(source) => KanbanError::Parse {
            path: path.clone(),
            line: source.location().map(|loc| loc.line()),
            message: source.to_string(),
        },
        ConfigError::Invalid(message) => KanbanError::Parse {
            path: path.clone(),
            line: None,
            message,
        },
    })?;
    config.validate().map_err(|err| KanbanError::Parse {
        path: path.clone(),
        line: None,
        message: err.to_string(),
    })?;
    Ok(config)
}

/// Read the configuration and every task document. Files that fail to parse
/// are skipped and reported as warnings.
pub fn load_all(root: &Path) -> Result<LoadedBoard> {
    let config = read_config(root)?;
    let mut warnings = Vec::new();
    let mut tasks = Vec::new();
    for path in task_files(root)? {
        match parse_task_file(&path) {
            Ok(task) => tasks.push(task),
            Err(err) => {
                let location = match err.line() {
                    Some(line) => format!("{}:{}", path.display(), line),
                    None => path.display().to_string(),
                };
                warn!(path = %path.display(), error = %err, "skipping unparsable task file");
                warnings.push(format!("skipping {location}: {err}"));
            }
        }
    }
    debug!(root = %root.display(), tasks = tasks.len(), "loaded board");
    Ok(LoadedBoard {
        config,
        tasks,
        warnings,
    })
}

/// Every `*.md` directly under `tasks/`, in path order.
pub fn task_files(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = tasks_dir(root);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(&dir).at_path(&dir)? {
        let path = entry.at_path(&dir)?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if !hidden && path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Persist a task at its canonical path. When the canonical path changed
/// (title edit, repair) the previous file is removed after the rename.
pub fn write_task(root: &Path, task: &mut Task) -> Result<PathBuf> {
    let target = tasks_dir(root).join(task.file_name());
    atomic_write(&target, render_task(task)?.as_bytes())?;
    if let Some(previous) = task.file_path.take() {
        if previous != target && previous.exists() {
            delete_task_file(&previous)?;
        }
    }
    debug!(id = task.id, path = %target.display(), "wrote task");
    task.file_path = Some(target.clone());
    task.file_mtime = fs::metadata(&target).and_then(|m| m.modified()).ok();
    Ok(target)
}

pub fn delete_task_file(path: &Path) -> Result<()> {
    fs::remove_file(path).at_path(path)
}

/// Exclusive advisory lock held for one load/decide/write cycle.
#[derive(Debug)]
pub struct BoardLock {
    file: File,
    path: PathBuf,
}

impl BoardLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .at_path(&path)?;
        file.lock_exclusive().at_path(&path)?;
        debug!(path = %path.display(), "acquired board lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BoardLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
