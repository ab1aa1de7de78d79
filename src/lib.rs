#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod context;
mod core;
pub mod dispatch;
mod error;
pub mod loader;
pub mod locate;
pub mod manifest;
mod options;
pub mod targets;
mod utils;

pub use crate::context::{BuildContext, ConfigSet, InstallMode, TargetType, TargetTypes};
pub use crate::core::{Action, Artifact, ShellAction, Task, TaskGraph, TaskGroup};
pub use crate::dispatch::{
    Context, ContextKind, Framework, Handler, Registry, Report, Session, dispatch, wildcard_main,
};
pub use crate::error::*;
pub use crate::loader::{Engine, LoadOpts, Loader, Lockfile};
pub use crate::locate::{TaskLocator, normalize_query, run_named_build_task};
pub use crate::options::{LOCKFILE, Options};
pub use crate::targets::{normalize_targets, rewrite_compile_targets};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::utils::{format_elapsed, normpath};
