use camino::Utf8PathBuf;
use clap::Parser;
use wildrun::manifest::{ManifestEngine, ManifestFramework};
use wildrun::{
    Context, ContextKind, LoadOpts, Loader, Options, Registry, Session, run_named_build_task,
    wildcard_main,
};

/// Task-graph build driver with wildcard task selection.
#[derive(Parser, Debug)]
#[command(name = "wildrun", version, about)]
struct Args {
    /// Commands to run in order; unknown ones are treated as task globs.
    #[arg(default_value = "build")]
    commands: Vec<String>,

    /// Comma separated list of targets to build.
    #[arg(long = "targets")]
    targets: Option<String>,

    /// Show a progress bar instead of per-command timings.
    #[arg(long, short = 'p')]
    progress_bar: bool,

    /// Lockfile written by `configure`.
    #[arg(long, default_value = wildrun::LOCKFILE)]
    lockfile: Utf8PathBuf,

    /// Enable debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    wildrun::init_logging(args.verbose)?;

    let options = Options {
        compile_targets: args.targets,
        progress_bar: args.progress_bar,
        lockfile: args.lockfile,
        verbose: args.verbose,
        ..Options::default()
    };

    let loader = Loader::new(ManifestEngine);
    let mut framework = ManifestFramework::new();
    let mut registry = Registry::new();
    registry.context("list", |name, options| Context::new(ContextKind::List, name, options));
    registry.command("list", |ctx| {
        let mut options = ctx.options.clone();
        let bld = Loader::new(ManifestEngine).load(&mut options, LoadOpts::quiet())?;
        for task in bld.graph.tasks() {
            println!("{}", task.display());
        }
        Ok(())
    });

    let mut session = Session::new(args.commands, options);
    wildcard_main(
        &mut session,
        &loader,
        &mut framework,
        &mut registry,
        |query, options| {
            run_named_build_task(&loader, options, query)?;
            Ok(())
        },
    )?;

    Ok(())
}
