//! Running a single build task picked by a shell glob.
//!
//! The query is matched against every input and output of every task, each
//! expressed twice: relative to the current directory and relative to the
//! project's top directory. Matching tasks are executed right away through
//! [`Engine::execute`], outside of the normal scheduler.
//!
//! Walk order is fixed: groups in order, tasks in order, outputs before
//! inputs, artifacts in declaration order. The first failing task aborts the
//! scan.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use glob::Pattern;

use crate::context::BuildContext;
use crate::core::{Artifact, Task};
use crate::error::LocateError;
use crate::loader::{Engine, LoadOpts, Loader};
use crate::options::Options;
use crate::utils::{normpath, relative_to};

/// Staging directory prefix that is equivalent to the bare target path.
pub const STAGING_PREFIX: &str = "bin/default/";

/// Turns a user supplied path into the string matched against artifacts.
///
/// The path is normalized lexically, replaced by its link target (relative
/// to `cwd`) when it is a symlink, and stripped of the `bin/default/` prefix.
pub fn normalize_query(query: &str, cwd: &Utf8Path) -> String {
    let mut query = normpath(query);

    let candidate = cwd.join(&query);
    if let Ok(target) = candidate.read_link_utf8() {
        // Relative link targets are resolved against the directory holding the link.
        let base = candidate.parent().unwrap_or(cwd);
        let absolute = Artifact::new(base, &target);
        query = relative_to(absolute.path(), cwd).into_string();
    }

    match query.strip_prefix(STAGING_PREFIX) {
        Some(stripped) => stripped.to_string(),
        None => query,
    }
}

/// Compiles the query with shell `fnmatch` semantics: `*` crosses `/` and a
/// run of stars is no different from a single one. Queries that are not a
/// valid glob (an unterminated `[` for example) match literally.
fn compile(query: &str) -> Pattern {
    let mut collapsed = String::with_capacity(query.len());
    for c in query.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }

    Pattern::new(&collapsed).unwrap_or_else(|_| {
        // Escaping only produces valid patterns.
        Pattern::new(&Pattern::escape(query)).unwrap_or_default()
    })
}

/// Finds and runs tasks in an already loaded [`BuildContext`].
pub struct TaskLocator<'a, E: Engine> {
    ctx: &'a BuildContext,
    engine: &'a E,
    cwd: Utf8PathBuf,
}

impl<'a, E: Engine> TaskLocator<'a, E> {
    pub fn new(ctx: &'a BuildContext, engine: &'a E, cwd: Utf8PathBuf) -> Self {
        Self { ctx, engine, cwd }
    }

    /// The first artifact of `task` matching `pattern`, outputs first.
    fn matching_artifact<'t>(&self, task: &'t Task, pattern: &Pattern) -> Option<&'t Artifact> {
        task.outputs
            .iter()
            .chain(task.inputs.iter())
            .find(|artifact| {
                let from_cwd = artifact.path_from(&self.cwd);
                let from_top = self.ctx.path_from_top(artifact);

                pattern.matches(from_cwd.as_str()) || pattern.matches(from_top.as_str())
            })
    }

    /// Tasks matching `query`, each paired with the artifact that matched,
    /// in walk order. The query must already be normalized.
    pub fn find(&self, query: &str) -> Vec<(&'a Task, &'a Artifact)> {
        let pattern = compile(query);

        self.ctx
            .graph
            .tasks()
            .filter_map(|task| {
                self.matching_artifact(task, &pattern)
                    .map(|artifact| (task, artifact))
            })
            .collect()
    }

    /// Runs every task matching `query`, writing a description of each to
    /// `out` before it starts. Returns the number of tasks run.
    pub fn run(&self, query: &str, out: &mut impl Write) -> Result<usize, LocateError> {
        let found = self.find(query);
        if found.is_empty() {
            return Err(LocateError::NoMatchingTarget(query.to_string()));
        }

        for (task, key) in &found {
            tracing::debug!("{query} matched {key} of task {}", task.name);
            writeln!(out, "{}", style(task.display()).bold()).map_err(LocateError::Output)?;

            run_task(self.engine, task, key)?;
        }

        Ok(found.len())
    }
}

/// Executes one task, turning a non-zero status into an error naming `key`.
pub fn run_task<E: Engine>(engine: &E, task: &Task, key: &Artifact) -> Result<(), LocateError> {
    let status = engine.execute(task).map_err(|source| LocateError::Action {
        key: key.path().to_owned(),
        source,
    })?;

    if status != 0 {
        return Err(LocateError::TaskExecution {
            key: key.path().to_owned(),
            status,
        });
    }

    Ok(())
}

/// Loads the project and runs the tasks matching `query`, printing their
/// descriptions on stdout.
pub fn run_named_build_task<E: Engine>(
    loader: &Loader<E>,
    options: &mut Options,
    query: &str,
) -> Result<usize, LocateError> {
    let cwd = options.launch_dir()?;
    let query = normalize_query(query, &cwd);

    let ctx = loader.load(options, LoadOpts::quiet())?;
    let locator = TaskLocator::new(&ctx, loader.engine(), cwd);

    locator.run(&query, &mut std::io::stdout().lock())
}
