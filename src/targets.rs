//! Rewriting `--targets` so that symlinks into the build output directory
//! (the `bin/<name>` form users get from tab completion) name real targets.

use camino::Utf8Path;

use crate::context::TargetTypes;
use crate::error::ConfigError;
use crate::loader::{Engine, LoadOpts, Loader};
use crate::options::Options;

/// Maps every comma separated entry of `requested` to canonical target names.
///
/// Entries that are not symlinks (relative to `cwd`) pass through untouched.
/// For a symlink, the last segment of its target and the last two segments
/// joined with `/` are each kept when they name a known target, so one entry
/// may yield zero, one or two names. A symlink with no known alias is dropped
/// while a plain unknown name is kept.
pub fn normalize_targets(requested: &str, types: &TargetTypes, cwd: &Utf8Path) -> Vec<String> {
    let mut list = Vec::new();

    for name in requested.split(',') {
        let Ok(link) = cwd.join(name).read_link_utf8() else {
            list.push(name.to_string());
            continue;
        };

        let segments: Vec<&str> = link.as_str().split('/').collect();
        let last = segments.last().copied().unwrap_or_default().to_string();
        let last_two = segments[segments.len().saturating_sub(2)..].join("/");

        for candidate in [last, last_two] {
            if types.contains(&candidate) {
                list.push(candidate);
            }
        }
    }

    list
}

/// Rewrites `options.compile_targets` in place. Does nothing (and loads
/// nothing) when no targets were requested.
pub fn rewrite_compile_targets<E: Engine>(
    loader: &Loader<E>,
    options: &mut Options,
) -> Result<(), ConfigError> {
    let Some(requested) = options.targets().map(str::to_owned) else {
        return Ok(());
    };

    let cwd = options.launch_dir()?;

    let ctx = loader.load(options, LoadOpts::quiet())?;
    let list = normalize_targets(&requested, ctx.target_types(), &cwd);

    tracing::debug!("compile targets {requested:?} rewritten to {list:?}");
    options.compile_targets = Some(list.join(","));

    Ok(())
}
