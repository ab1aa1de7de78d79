//! A small JSON driven build engine.
//!
//! Every project directory may hold a `wildrun.json` describing its targets,
//! its tasks (grouped into phases) and the subdirectories to recurse into:
//!
//! ```json
//! {
//!   "targets": { "talloc": "library" },
//!   "subdirs": ["lib/replace"],
//!   "groups": [
//!     [{ "name": "cc", "target": "talloc",
//!        "inputs": ["talloc.c"], "outputs": ["talloc.o"],
//!        "run": ["cc", "-c", "talloc.c", "-o", "../bin/default/talloc.o"] }]
//!   ]
//! }
//! ```
//!
//! Inputs are relative to the manifest's directory. Outputs are relative to
//! the mirror of that directory under `<out_dir>/default`, which is where the
//! `bin/default/` paths users type come from.

use std::collections::BTreeMap;
use std::fs;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::context::{BuildContext, ConfigSet, TargetType, VARIANT};
use crate::core::{Artifact, ShellAction, Task};
use crate::dispatch::{Context, Framework};
use crate::loader::{CACHE_DIR, CACHE_SUFFIX, Engine, LoadOpts, Loader, Lockfile};
use crate::locate::run_task;
use crate::utils::relative_to;

pub const MANIFEST: &str = "wildrun.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Manifest {
    targets: BTreeMap<String, TargetType>,
    subdirs: Vec<Utf8PathBuf>,
    groups: Vec<Vec<TaskSpec>>,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    name: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    inputs: Vec<Utf8PathBuf>,
    #[serde(default)]
    outputs: Vec<Utf8PathBuf>,
    #[serde(default)]
    run: Vec<String>,
}

impl Manifest {
    fn read(dir: &Utf8Path) -> anyhow::Result<Self> {
        let path = dir.join(MANIFEST);
        let data = fs::read_to_string(&path).with_context(|| format!("couldn't read {path}"))?;
        let manifest =
            serde_json::from_str(&data).with_context(|| format!("couldn't parse {path}"))?;
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestEngine;

impl Engine for ManifestEngine {
    fn recurse(&self, ctx: &mut BuildContext, dir: &Utf8Path) -> anyhow::Result<()> {
        let manifest = Manifest::read(dir)?;

        let out_base = ctx.variant_dir().join(relative_to(dir, &ctx.top_dir));

        for (name, kind) in manifest.targets {
            ctx.target_types_mut().insert(name, kind);
        }

        for (index, specs) in manifest.groups.into_iter().enumerate() {
            while ctx.graph.groups.len() <= index {
                ctx.graph.add_group();
            }

            for spec in specs {
                let action = ShellAction {
                    argv: spec.run,
                    cwd: dir.to_owned(),
                };

                let mut task = Task::new(spec.name, action)
                    .with_inputs(spec.inputs.iter().map(|p| Artifact::new(dir, p)))
                    .with_outputs(spec.outputs.iter().map(|p| Artifact::new(&out_base, p)));
                task.target = spec.target;

                ctx.graph.groups[index].push(task);
            }
        }

        for subdir in manifest.subdirs {
            self.recurse(ctx, &dir.join(subdir))?;
        }

        Ok(())
    }

    fn execute(&self, task: &Task) -> anyhow::Result<i32> {
        for output in &task.outputs {
            if let Some(parent) = output.path().parent() {
                fs::create_dir_all(parent)?;
            }
        }

        task.run()
    }
}

/// `configure` and `build` for manifest driven projects.
#[derive(Default)]
pub struct ManifestFramework {
    loader: Loader<ManifestEngine>,
}

impl ManifestFramework {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Framework for ManifestFramework {
    /// Records the project layout for later invocations.
    fn configure(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        let top_dir = ctx.options.launch_dir()?;
        Manifest::read(&top_dir)?;

        let out_dir = top_dir.join("bin");
        let cache_dir = out_dir.join(CACHE_DIR);
        fs::create_dir_all(&cache_dir)?;

        let mut env = ConfigSet::default();
        env.set("TOP_DIR", top_dir.as_str());
        env.set("OUT_DIR", out_dir.as_str());
        fs::write(
            cache_dir.join(format!("{VARIANT}{CACHE_SUFFIX}")),
            serde_json::to_string_pretty(&env)?,
        )?;

        Lockfile {
            top_dir: top_dir.clone(),
            out_dir: out_dir.clone(),
            run_dir: top_dir,
        }
        .write(&ctx.options.lockfile)?;

        tracing::info!("configured, build directory is {out_dir}");
        Ok(())
    }

    /// Runs every task in graph order, restricted to the requested compile
    /// targets when there are any.
    fn build(&mut self, ctx: &mut Context) -> anyhow::Result<()> {
        let mut options = ctx.options.clone();
        let wanted: Option<Vec<String>> = options
            .targets()
            .map(|targets| targets.split(',').map(str::to_owned).collect());

        let bld = self.loader.load(&mut options, LoadOpts::default())?;
        let engine = self.loader.engine();

        for task in bld.graph.tasks() {
            if let Some(wanted) = &wanted {
                let selected = task
                    .target
                    .as_ref()
                    .is_some_and(|target| wanted.contains(target));
                if !selected {
                    continue;
                }
            }

            let key = task
                .outputs
                .first()
                .or_else(|| task.inputs.first())
                .cloned()
                .unwrap_or_else(|| Artifact::new(&bld.top_dir, &task.name));

            println!("{}", console::style(task.display()).bold());
            run_task(engine, task, &key)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loader::test::tempdir;
    use crate::options::{LOCKFILE, Options};

    fn write_project(root: &Utf8Path) {
        fs::write(
            root.join(MANIFEST),
            r#"{
                "targets": { "talloc": "library" },
                "subdirs": ["lib"],
                "groups": [
                    [{ "name": "gen", "outputs": ["config.h"], "run": ["true"] }],
                    [{ "name": "cc", "target": "talloc", "inputs": ["talloc.c"],
                       "outputs": ["talloc.o"], "run": ["true"] }]
                ]
            }"#,
        )
        .unwrap();

        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(
            root.join("lib").join(MANIFEST),
            r#"{
                "targets": { "replace": "subsystem" },
                "groups": [
                    [{ "name": "cc", "target": "replace", "inputs": ["replace.c"],
                       "outputs": ["replace.o"], "run": ["false"] }]
                ]
            }"#,
        )
        .unwrap();

        let out_dir = root.join("bin");
        fs::create_dir_all(out_dir.join(CACHE_DIR)).unwrap();
        fs::write(out_dir.join(CACHE_DIR).join("default_cache.json"), "{}").unwrap();
        Lockfile {
            top_dir: root.to_owned(),
            out_dir,
            run_dir: root.to_owned(),
        }
        .write(&root.join(LOCKFILE))
        .unwrap();
    }

    #[test]
    fn test_recurse_builds_groups_and_targets() {
        let (_guard, root) = tempdir();
        write_project(&root);

        let mut options = Options {
            lockfile: root.join(LOCKFILE),
            ..Options::default()
        };
        let ctx = Loader::new(ManifestEngine)
            .load(&mut options, LoadOpts::quiet())
            .unwrap();

        assert_eq!(ctx.graph.groups.len(), 2);
        assert_eq!(ctx.graph.groups[0].tasks.len(), 2);
        assert_eq!(ctx.graph.groups[1].tasks.len(), 1);
        assert!(ctx.target_types().contains("talloc"));
        assert_eq!(
            ctx.target_types().get("replace"),
            Some(&TargetType::Subsystem)
        );

        let replace = &ctx.graph.groups[0].tasks[1];
        assert_eq!(replace.inputs[0].path(), root.join("lib/replace.c"));
        assert_eq!(
            replace.outputs[0].path_from(&root),
            "bin/default/lib/replace.o"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_build_respects_compile_targets() {
        let (_guard, root) = tempdir();
        write_project(&root);

        let options = Options {
            lockfile: root.join(LOCKFILE),
            compile_targets: Some("talloc".into()),
            ..Options::default()
        };
        let mut ctx = Context::generic("build", &options);

        // Only the talloc task runs, so the failing replace task is skipped.
        ManifestFramework::new().build(&mut ctx).unwrap();

        ctx.options.compile_targets = Some("replace".into());
        let err = ManifestFramework::new().build(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("replace.o"));
    }

    #[test]
    fn test_missing_manifest() {
        let (_guard, root) = tempdir();
        let mut ctx = BuildContext::new(root.clone(), root.join("bin"), root.clone());

        let err = ManifestEngine.recurse(&mut ctx, &root).unwrap_err();
        assert!(err.to_string().contains(MANIFEST));
    }
}
