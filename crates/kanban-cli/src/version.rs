//! Version strings shown by `kanban --version` and `kanban -V`.

pub const SHORT: &str = env!("CARGO_PKG_VERSION");

/// Package version plus the source revision and the board layout it writes.
pub const LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("KANBAN_REVISION"),
    "; file-backed kanban board, tasks as markdown with yaml frontmatter)"
);
