use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::utils::{normpath, relative_to};

/// A file a task reads or produces.
///
/// Artifacts are always stored as absolute, lexically normalized paths so that
/// they can be re-expressed relative to any anchor directory (usually the
/// current directory or the project's top directory).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Artifact(Utf8PathBuf);

impl Artifact {
    /// Creates an artifact from `path`, resolving it against `base` when it
    /// is relative.
    pub fn new(base: &Utf8Path, path: impl AsRef<Utf8Path>) -> Self {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_owned()
        } else {
            base.join(path)
        };

        Artifact(Utf8PathBuf::from(normpath(joined.as_str())))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.0
    }

    /// Path of this artifact as seen from `anchor`.
    pub fn path_from(&self, anchor: &Utf8Path) -> Utf8PathBuf {
        relative_to(&self.0, anchor)
    }

    pub fn name(&self) -> &str {
        self.0.file_name().unwrap_or(self.0.as_str())
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Artifact({})", self.0)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The work a task performs. A returned status of `0` means success, any
/// other value is the failure code reported to the user.
pub trait Action {
    fn run(&self) -> anyhow::Result<i32>;
}

impl<F> Action for F
where
    F: Fn() -> anyhow::Result<i32>,
{
    fn run(&self) -> anyhow::Result<i32> {
        self()
    }
}

/// Runs an external program, reporting its exit code as the task status.
#[derive(Debug, Clone)]
pub struct ShellAction {
    pub argv: Vec<String>,
    pub cwd: Utf8PathBuf,
}

impl Action for ShellAction {
    fn run(&self) -> anyhow::Result<i32> {
        let Some((program, args)) = self.argv.split_first() else {
            return Ok(0);
        };

        let status = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .status()
            .map_err(|e| anyhow::anyhow!("couldn't spawn '{program}': {e}"))?;

        // Killed by a signal, there is no exit code to forward.
        Ok(status.code().unwrap_or(-1))
    }
}

/// A single unit of build work with declared inputs and outputs.
pub struct Task {
    pub name: String,
    /// Build target this task belongs to, if declared.
    pub target: Option<String>,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    action: Box<dyn Action>,
}

impl Task {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            target: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            action: Box::new(action),
        }
    }

    /// Wraps a closure as the task action.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<i32> + 'static,
    {
        Self::new(name, f)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Executes the action in the calling thread.
    pub fn run(&self) -> anyhow::Result<i32> {
        self.action.run()
    }

    /// Short human readable description, `name: in1 in2 -> out1`.
    pub fn display(&self) -> String {
        let join = |list: &[Artifact]| {
            list.iter()
                .map(Artifact::name)
                .collect::<Vec<_>>()
                .join(" ")
        };

        match (self.inputs.is_empty(), self.outputs.is_empty()) {
            (true, true) => self.name.clone(),
            (false, true) => format!("{}: {}", self.name, join(&self.inputs)),
            (true, false) => format!("{}: -> {}", self.name, join(&self.outputs)),
            (false, false) => format!(
                "{}: {} -> {}",
                self.name,
                join(&self.inputs),
                join(&self.outputs)
            ),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Tasks sharing one scheduling phase, in declaration order.
#[derive(Debug, Default)]
pub struct TaskGroup {
    pub tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) -> &mut Self {
        self.tasks.push(task);
        self
    }
}

/// The whole task graph: groups run strictly one after another.
#[derive(Debug, Default)]
pub struct TaskGraph {
    pub groups: Vec<TaskGroup>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last group, opening a fresh one if the graph is empty.
    pub fn current_group(&mut self) -> &mut TaskGroup {
        if self.groups.is_empty() {
            self.groups.push(TaskGroup::new());
        }
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    pub fn add_group(&mut self) -> &mut TaskGroup {
        self.groups.push(TaskGroup::new());
        self.current_group()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.groups.iter().flat_map(|group| group.tasks.iter())
    }

    pub fn len(&self) -> usize {
        self.tasks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
