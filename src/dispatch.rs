//! The command loop.
//!
//! Commands are consumed front to back from a [`Session`] queue. `configure`
//! and `build` go to the [`Framework`], anything else to a handler from the
//! [`Registry`]. A command nobody handles is passed to a caller supplied
//! callback and ends the loop. Once the queue runs dry a final `shutdown` is
//! queued, so every complete run ends with one.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::error::{DispatchError, RegistryError};
use crate::loader::{Engine, Loader};
use crate::options::Options;
use crate::targets::rewrite_compile_targets;
use crate::utils::format_elapsed;

/// Commands whose handlers may be registered without a context argument.
pub const BARE_COMMANDS: [&str; 5] = ["init", "shutdown", "dist", "distclean", "distcheck"];

pub const SHUTDOWN: &str = "shutdown";

/// Flavor of context created for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    Generic,
    Configure,
    Build,
    Clean,
    Install,
    Uninstall,
    List,
}

/// Per-command state handed to handlers.
#[derive(Debug, Clone)]
pub struct Context {
    pub command: String,
    pub kind: ContextKind,
    /// Snapshot of the options at the time the command started.
    pub options: Options,
}

impl Context {
    pub fn new(kind: ContextKind, command: &str, options: &Options) -> Self {
        Self {
            command: command.to_string(),
            kind,
            options: options.clone(),
        }
    }

    pub fn generic(command: &str, options: &Options) -> Self {
        Self::new(ContextKind::Generic, command, options)
    }
}

pub type ContextFactory = fn(&str, &Options) -> Context;

type BareFn = Box<dyn FnMut() -> anyhow::Result<()>>;
type ContextualFn = Box<dyn FnMut(&mut Context) -> anyhow::Result<()>>;

/// A command implementation. The variant fixes the calling convention at
/// registration time.
pub enum Handler {
    Bare(BareFn),
    Contextual(ContextualFn),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Bare(_) => f.write_str("Handler::Bare"),
            Handler::Contextual(_) => f.write_str("Handler::Contextual"),
        }
    }
}

/// The framework's own entry points for the two built-in commands.
pub trait Framework {
    fn configure(&mut self, ctx: &mut Context) -> anyhow::Result<()>;
    fn build(&mut self, ctx: &mut Context) -> anyhow::Result<()>;
}

/// User defined commands and the contexts they run in.
///
/// A fresh registry already knows `shutdown` as a no-op so that the command
/// queued at the end of every run always resolves. Registering another
/// `shutdown` replaces it.
pub struct Registry {
    handlers: HashMap<String, Handler>,
    contexts: HashMap<String, ContextFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.handlers)
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(SHUTDOWN.to_string(), Handler::Bare(Box::new(|| Ok(()))));

        Self {
            handlers,
            contexts: HashMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: Handler) -> Result<&mut Self, RegistryError> {
        if matches!(handler, Handler::Bare(_)) && !BARE_COMMANDS.contains(&name) {
            return Err(RegistryError::BareHandlerNotAllowed(name.to_string()));
        }

        self.handlers.insert(name.to_string(), handler);
        Ok(self)
    }

    /// Registers a handler taking the command context.
    pub fn command<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: FnMut(&mut Context) -> anyhow::Result<()> + 'static,
    {
        self.handlers
            .insert(name.to_string(), Handler::Contextual(Box::new(f)));
        self
    }

    /// Registers a handler taking no arguments, only valid for
    /// [`BARE_COMMANDS`].
    pub fn bare<F>(&mut self, name: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.register(name, Handler::Bare(Box::new(f)))
    }

    /// Makes `name` run in the context produced by `factory` instead of the
    /// generic one.
    pub fn context(&mut self, name: &str, factory: ContextFactory) -> &mut Self {
        self.contexts.insert(name.to_string(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    fn make_context(&self, name: &str, options: &Options) -> Context {
        match self.contexts.get(name) {
            Some(factory) => factory(name, options),
            None => Context::generic(name, options),
        }
    }
}

/// Explicit state of one tool invocation: the pending commands and the
/// options they run with.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub queue: VecDeque<String>,
    pub options: Options,
}

impl Session {
    pub fn new<I, S>(commands: I, options: Options) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: commands.into_iter().map(Into::into).collect(),
            options,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Commands from the original queue are being processed.
    Running,
    /// The trailing `shutdown` has been queued.
    Draining,
    Terminated,
}

/// A command that completed, with its wall clock time unless a progress bar
/// was active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub command: String,
    pub elapsed: Option<String>,
}

/// What a dispatch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Every command popped off the queue, in order.
    pub processed: Vec<String>,
    /// Completion records, `init` and `shutdown` excluded.
    pub finished: Vec<Finished>,
    /// The unknown command that ended the loop, if any.
    pub missing: Option<String>,
}

enum Target {
    Configure,
    Build,
    Handler(Handler),
}

/// Drives a [`Session`] one command at a time.
pub struct Dispatcher<'s, F, M>
where
    F: Framework,
    M: FnMut(&str, &mut Options) -> anyhow::Result<()>,
{
    session: &'s mut Session,
    framework: &'s mut F,
    registry: &'s mut Registry,
    missing: M,
    state: LoopState,
    report: Report,
}

impl<'s, F, M> Dispatcher<'s, F, M>
where
    F: Framework,
    M: FnMut(&str, &mut Options) -> anyhow::Result<()>,
{
    pub fn new(
        session: &'s mut Session,
        framework: &'s mut F,
        registry: &'s mut Registry,
        missing: M,
    ) -> Self {
        Self {
            session,
            framework,
            registry,
            missing,
            state: LoopState::Running,
            report: Report::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Processes the command at the front of the queue.
    pub fn step(&mut self) -> Result<LoopState, DispatchError> {
        let Some(command) = self.session.queue.pop_front() else {
            self.state = LoopState::Terminated;
            return Ok(self.state);
        };

        let started = Instant::now();
        self.report.processed.push(command.clone());

        // Registered handlers are taken out for the call and put back after.
        let target = match command.as_str() {
            "configure" => Some(Target::Configure),
            "build" => Some(Target::Build),
            name => self.registry.handlers.remove(name).map(Target::Handler),
        };

        let Some(target) = target else {
            tracing::debug!("no handler for {command:?}, delegating");
            (self.missing)(&command, &mut self.session.options).map_err(|source| {
                DispatchError::Missing {
                    command: command.clone(),
                    source,
                }
            })?;

            self.report.missing = Some(command);
            self.state = LoopState::Terminated;
            return Ok(self.state);
        };

        let mut ctx = self.registry.make_context(&command, &self.session.options);

        let result = match target {
            Target::Configure => self.framework.configure(&mut ctx),
            Target::Build => self.framework.build(&mut ctx),
            Target::Handler(mut handler) => {
                let result = match &mut handler {
                    Handler::Bare(f) => f(),
                    Handler::Contextual(f) => f(&mut ctx),
                };
                self.registry.handlers.insert(command.clone(), handler);
                result
            }
        };
        result.map_err(|source| DispatchError::Handler {
            command: command.clone(),
            source,
        })?;

        if command != "init" && command != SHUTDOWN {
            let elapsed =
                (!self.session.options.progress_bar).then(|| format_elapsed(started.elapsed()));

            match &elapsed {
                Some(elapsed) => tracing::info!("{command:?} finished successfully ({elapsed})"),
                None => tracing::info!("{command:?} finished successfully"),
            }

            self.report.finished.push(Finished {
                command: command.clone(),
                elapsed,
            });
        }

        if self.session.queue.is_empty() {
            if command == SHUTDOWN {
                self.state = LoopState::Terminated;
            } else {
                self.session.queue.push_back(SHUTDOWN.to_string());
                self.state = LoopState::Draining;
            }
        }

        Ok(self.state)
    }

    /// Steps until the loop terminates, returning what was done.
    pub fn run(mut self) -> Result<Report, DispatchError> {
        while self.step()? != LoopState::Terminated {}
        Ok(self.report)
    }
}

/// Runs every queued command of `session`.
pub fn dispatch<F, M>(
    session: &mut Session,
    framework: &mut F,
    registry: &mut Registry,
    missing: M,
) -> Result<Report, DispatchError>
where
    F: Framework,
    M: FnMut(&str, &mut Options) -> anyhow::Result<()>,
{
    Dispatcher::new(session, framework, registry, missing).run()
}

/// Normalizes the compile targets of `session`, then dispatches its commands.
pub fn wildcard_main<E, F, M>(
    session: &mut Session,
    loader: &Loader<E>,
    framework: &mut F,
    registry: &mut Registry,
    missing: M,
) -> Result<Report, DispatchError>
where
    E: Engine,
    F: Framework,
    M: FnMut(&str, &mut Options) -> anyhow::Result<()>,
{
    rewrite_compile_targets(loader, &mut session.options)?;
    dispatch(session, framework, registry, missing)
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Default)]
    struct Recorder {
        log: Log,
    }

    impl Framework for Recorder {
        fn configure(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("configure:{:?}", ctx.kind));
            Ok(())
        }

        fn build(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("build:{:?}", ctx.kind));
            Ok(())
        }
    }

    fn never(name: &str, _: &mut Options) -> anyhow::Result<()> {
        panic!("unexpected missing command {name}")
    }

    fn registry_with_shutdown(log: &Log) -> Registry {
        let mut registry = Registry::new();
        let log = log.clone();
        registry
            .bare(SHUTDOWN, move || {
                log.borrow_mut().push("shutdown".into());
                Ok(())
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_build_then_shutdown() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let mut session = Session::new(["build"], Options::default());

        let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert!(session.queue.is_empty());
        assert_eq!(report.processed, ["build", "shutdown"]);
        assert_eq!(report.finished.len(), 1);
        assert_eq!(report.finished[0].command, "build");
        assert!(report.finished[0].elapsed.is_some());
        assert_eq!(*framework.log.borrow(), ["build:Generic", "shutdown"]);
    }

    #[test]
    fn test_missing_command_terminates() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let mut session = Session::new(["frobnicate"], Options::default());

        let mut seen = Vec::new();
        let report = dispatch(&mut session, &mut framework, &mut registry, |name, _| {
            seen.push(name.to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, ["frobnicate"]);
        assert_eq!(report.missing.as_deref(), Some("frobnicate"));
        assert_eq!(report.processed, ["frobnicate"]);
        assert!(session.queue.is_empty());
        assert!(framework.log.borrow().is_empty());
    }

    #[test]
    fn test_missing_command_leaves_rest_of_queue() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let mut session = Session::new(["configure", "frobnicate", "build"], Options::default());

        let report = dispatch(&mut session, &mut framework, &mut registry, |_, _| Ok(())).unwrap();

        assert_eq!(report.processed, ["configure", "frobnicate"]);
        assert_eq!(session.queue, ["build"]);
        assert_eq!(*framework.log.borrow(), ["configure:Generic"]);
    }

    #[test]
    fn test_missing_callback_error_propagates() {
        let mut framework = Recorder::default();
        let mut registry = Registry::new();
        let mut session = Session::new(["bin/default/foo.o"], Options::default());

        let err = dispatch(&mut session, &mut framework, &mut registry, |name, _| {
            anyhow::bail!("no task for {name}")
        })
        .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Missing { ref command, .. } if command == "bin/default/foo.o"
        ));
    }

    #[test]
    fn test_shutdown_always_last() {
        let queues: [&[&str]; 4] = [
            &["configure"],
            &["configure", "build"],
            &["init", "build", "install"],
            &["shutdown", "build"],
        ];

        for queue in queues {
            let mut framework = Recorder::default();
            let mut registry = registry_with_shutdown(&framework.log);
            registry.command("install", |_| Ok(()));
            registry.bare("init", || Ok(())).unwrap();

            let mut session = Session::new(queue.iter().copied(), Options::default());
            let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

            assert_eq!(report.processed.last().map(String::as_str), Some(SHUTDOWN));
            assert_eq!(&report.processed[..queue.len()], queue);
        }
    }

    #[test]
    fn test_explicit_shutdown_not_repeated() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let mut session = Session::new(["build", "shutdown"], Options::default());

        let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(report.processed, ["build", "shutdown"]);
    }

    #[test]
    fn test_init_and_shutdown_not_logged() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        registry.bare("init", || Ok(())).unwrap();
        let mut session = Session::new(["init"], Options::default());

        let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(report.processed, ["init", "shutdown"]);
        assert!(report.finished.is_empty());
    }

    #[test]
    fn test_progress_bar_hides_elapsed() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let options = Options {
            progress_bar: true,
            ..Options::default()
        };
        let mut session = Session::new(["build"], options);

        let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(
            report.finished,
            [Finished {
                command: "build".into(),
                elapsed: None
            }]
        );
    }

    #[test]
    fn test_context_factory() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        registry
            .context("build", |name, options| {
                Context::new(ContextKind::Build, name, options)
            })
            .context("clean", |name, options| {
                Context::new(ContextKind::Clean, name, options)
            });

        let log = framework.log.clone();
        registry.command("clean", move |ctx| {
            log.borrow_mut()
                .push(format!("{}:{:?}", ctx.command, ctx.kind));
            Ok(())
        });

        let mut session = Session::new(["build", "clean"], Options::default());
        dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(
            *framework.log.borrow(),
            ["build:Build", "clean:Clean", "shutdown"]
        );
    }

    #[test]
    fn test_bare_only_for_fixed_commands() {
        let mut registry = Registry::new();

        assert!(registry.bare("dist", || Ok(())).is_ok());
        assert!(registry.bare("distcheck", || Ok(())).is_ok());

        let err = registry.bare("install", || Ok(())).unwrap_err();
        assert!(matches!(err, RegistryError::BareHandlerNotAllowed(ref name) if name == "install"));
        assert!(!registry.contains("install"));
    }

    #[test]
    fn test_bare_and_contextual_fixed_commands() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);

        let log = framework.log.clone();
        registry.command("dist", move |ctx| {
            log.borrow_mut().push(format!("dist:{}", ctx.command));
            Ok(())
        });
        let log = framework.log.clone();
        registry
            .bare("distclean", move || {
                log.borrow_mut().push("distclean".into());
                Ok(())
            })
            .unwrap();

        let mut session = Session::new(["dist", "distclean"], Options::default());
        dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(
            *framework.log.borrow(),
            ["dist:dist", "distclean", "shutdown"]
        );
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        registry.command("install", |_| anyhow::bail!("permission denied"));
        let mut session = Session::new(["install", "build"], Options::default());

        let err = dispatch(&mut session, &mut framework, &mut registry, never).unwrap_err();

        assert!(matches!(err, DispatchError::Handler { ref command, .. } if command == "install"));
        assert_eq!(session.queue, ["build"]);
        assert!(framework.log.borrow().is_empty());
    }

    #[test]
    fn test_step_states() {
        let mut framework = Recorder::default();
        let mut registry = registry_with_shutdown(&framework.log);
        let mut session = Session::new(["configure", "build"], Options::default());

        let mut dispatcher = Dispatcher::new(&mut session, &mut framework, &mut registry, never);
        assert_eq!(dispatcher.state(), LoopState::Running);
        assert_eq!(dispatcher.step().unwrap(), LoopState::Running);
        assert_eq!(dispatcher.step().unwrap(), LoopState::Draining);
        assert_eq!(dispatcher.step().unwrap(), LoopState::Terminated);
        assert_eq!(dispatcher.step().unwrap(), LoopState::Terminated);
    }

    #[test]
    fn test_default_registry_handles_shutdown() {
        let mut framework = Recorder::default();
        let mut registry = Registry::new();
        let mut session = Session::new(["build"], Options::default());

        let report = dispatch(&mut session, &mut framework, &mut registry, never).unwrap();

        assert_eq!(report.processed, ["build", "shutdown"]);
        assert_eq!(report.missing, None);
        assert!(registry.contains(SHUTDOWN));
    }

    #[test]
    fn test_missing_command_builds_no_context() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static MADE: AtomicUsize = AtomicUsize::new(0);

        let mut framework = Recorder::default();
        let mut registry = Registry::new();
        registry.context("frobnicate", |name, options| {
            MADE.fetch_add(1, Ordering::SeqCst);
            Context::generic(name, options)
        });
        let mut session = Session::new(["frobnicate"], Options::default());

        dispatch(&mut session, &mut framework, &mut registry, |_, _| Ok(())).unwrap();
        assert_eq!(MADE.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_wildcard_main_rewrites_targets_and_runs_tasks() {
        use crate::context::TargetType;
        use crate::loader::test::{FixtureEngine, configure, tempdir};
        use crate::locate::run_named_build_task;

        let (_guard, root) = tempdir();
        let mut options = configure(&root);
        std::os::unix::fs::symlink("default/source3/smbd", root.join("smbd-link")).unwrap();
        options.compile_targets = Some("smbd-link".into());

        let loader = Loader::new(FixtureEngine {
            outputs: vec!["default/source3/smbd", "default/lib/a.o"],
            targets: vec![("smbd", TargetType::Binary)],
        });
        let mut framework = Recorder::default();
        let mut registry = Registry::new();
        let mut session = Session::new(["build", "bin/default/lib/a.o"], options);

        let mut ran = Vec::new();
        let report = wildcard_main(
            &mut session,
            &loader,
            &mut framework,
            &mut registry,
            |query, options| {
                ran.push(run_named_build_task(&loader, options, query)?);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(session.options.compile_targets.as_deref(), Some("smbd"));
        assert_eq!(report.processed, ["build", "bin/default/lib/a.o"]);
        assert_eq!(report.missing.as_deref(), Some("bin/default/lib/a.o"));
        assert_eq!(ran, [1]);
        assert_eq!(*framework.log.borrow(), ["build:Generic"]);
    }
}
