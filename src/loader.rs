//! Reconstructing a [`BuildContext`] from persisted configuration.
//!
//! `configure` leaves two things behind: a lockfile in the directory it ran
//! from, naming the top and output directories, and one cached environment
//! per configuration variant under `<out_dir>/c4che/`. The [`Loader`] reads
//! both back, then asks the [`Engine`] to create every task of the project
//! without running any of them. The result is suitable for introspection,
//! never for deployment, so install flags are forced off.

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::context::{BuildContext, ConfigSet, InstallMode};
use crate::core::Task;
use crate::error::ConfigError;
use crate::options::Options;

/// Directory below `out_dir` holding cached environments.
pub const CACHE_DIR: &str = "c4che";

/// File name suffix of a cached environment.
pub const CACHE_SUFFIX: &str = "_cache.json";

/// The build engine collaborator: knows how to turn a project description
/// into tasks and how to execute one of them.
pub trait Engine {
    /// Creates the tasks declared in `dir`, adding them to the context graph
    /// and registering declared targets in its target-type mapping.
    fn recurse(&self, ctx: &mut BuildContext, dir: &Utf8Path) -> anyhow::Result<()>;

    /// Called once every directory has been visited.
    fn pre_build(&self, _ctx: &mut BuildContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Finalizes buffered task state so that node metadata can be inspected.
    fn flush(&self, _ctx: &mut BuildContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Executes a single task out of band, bypassing the scheduler.
    fn execute(&self, task: &Task) -> anyhow::Result<i32> {
        task.run()
    }
}

/// Contents of the lockfile written by `configure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub top_dir: Utf8PathBuf,
    pub out_dir: Utf8PathBuf,
    pub run_dir: Utf8PathBuf,
}

impl Lockfile {
    pub fn read(path: &Utf8Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::NotConfigured {
            path: path.to_owned(),
            source,
        })?;

        serde_json::from_str(&data).map_err(|source| ConfigError::Corrupt {
            path: path.to_owned(),
            source,
        })
    }

    pub fn write(&self, path: &Utf8Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Knobs for [`Loader::load`].
#[derive(Debug, Clone, Copy)]
pub struct LoadOpts {
    /// Log an "Entering directory" notice.
    pub info: bool,
    /// Ask the engine to flush buffered task state before returning.
    pub flush: bool,
}

impl Default for LoadOpts {
    fn default() -> Self {
        Self {
            info: true,
            flush: false,
        }
    }
}

impl LoadOpts {
    pub fn quiet() -> Self {
        Self {
            info: false,
            flush: false,
        }
    }
}

pub struct Loader<E: Engine> {
    engine: E,
}

impl<E: Engine> Loader<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Creates all the tasks of the project without running the build.
    ///
    /// Forces `options.install` and `options.uninstall` off for the rest of
    /// the invocation.
    pub fn load(
        &self,
        options: &mut Options,
        opts: LoadOpts,
    ) -> Result<BuildContext, ConfigError> {
        options.install = false;
        options.uninstall = false;

        let lock = Lockfile::read(&options.lockfile)?;

        let mut ctx = BuildContext::new(lock.top_dir, lock.out_dir, lock.run_dir);
        ctx.install = InstallMode::None;
        ctx.envs = load_envs(&ctx.out_dir)?;

        if opts.info {
            tracing::info!("Entering directory `{}'", ctx.out_dir);
        }

        let top = ctx.top_dir.clone();
        self.engine
            .recurse(&mut ctx, &top)
            .map_err(ConfigError::Engine)?;
        self.engine.pre_build(&mut ctx).map_err(ConfigError::Engine)?;

        if opts.flush {
            self.engine.flush(&mut ctx).map_err(ConfigError::Engine)?;
        }

        tracing::debug!(
            "loaded {} tasks in {} groups",
            ctx.graph.len(),
            ctx.graph.groups.len()
        );

        Ok(ctx)
    }
}

impl<E: Engine + Default> Default for Loader<E> {
    fn default() -> Self {
        Self::new(E::default())
    }
}

/// Reads every `<name>_cache.json` found in `<out_dir>/c4che`.
fn load_envs(out_dir: &Utf8Path) -> Result<BTreeMap<String, ConfigSet>, ConfigError> {
    let dir = out_dir.join(CACHE_DIR);
    let entries = dir.read_dir_utf8().map_err(|source| ConfigError::NotConfigured {
        path: dir.clone(),
        source,
    })?;

    let mut envs = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::NotConfigured {
            path: dir.clone(),
            source,
        })?;

        let Some(name) = entry.file_name().strip_suffix(CACHE_SUFFIX) else {
            continue;
        };

        let path = entry.path();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::EnvCache {
            name: name.to_string(),
            source,
        })?;
        let env: ConfigSet = serde_json::from_str(&data).map_err(|source| ConfigError::Corrupt {
            path: path.to_owned(),
            source,
        })?;

        envs.insert(name.to_string(), env);
    }

    Ok(envs)
}
