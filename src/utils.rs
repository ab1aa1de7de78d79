use std::fmt::Write;
use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Lexically normalizes a `/` separated path: collapses repeated separators,
/// drops `.` segments and folds `name/..` pairs. Never touches the disk, so
/// glob metacharacters survive untouched.
pub fn normpath(path: &str) -> String {
    if path.is_empty() {
        return ".".into();
    }

    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") | None if !absolute => parts.push(part),
                Some(&"..") | None => {}
                Some(_) => {
                    parts.pop();
                }
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".into(),
        (false, false) => joined,
    }
}

/// Expresses `path` relative to `anchor`, climbing with `..` where the two
/// diverge. Both should be absolute and already normalized.
pub fn relative_to(path: &Utf8Path, anchor: &Utf8Path) -> Utf8PathBuf {
    let path: Vec<Utf8Component> = path.components().collect();
    let anchor: Vec<Utf8Component> = anchor.components().collect();

    let common = path
        .iter()
        .zip(anchor.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = Utf8PathBuf::new();
    for _ in common..anchor.len() {
        rel.push("..");
    }
    for component in &path[common..] {
        rel.push(component.as_str());
    }

    if rel.as_str().is_empty() {
        rel.push(".");
    }

    rel
}

/// Formats a duration as `[Nd][Nh][Nm]S.mmms`, leaving out leading units that
/// are zero.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = (total % 60) as f64 + f64::from(elapsed.subsec_micros()) / 1_000_000.0;

    let mut acc = String::new();
    if days > 0 {
        let _ = write!(acc, "{days}d");
    }
    if days > 0 || hours > 0 {
        let _ = write!(acc, "{hours}h");
    }
    if days > 0 || hours > 0 || minutes > 0 {
        let _ = write!(acc, "{minutes}m");
    }
    let _ = write!(acc, "{seconds:.3}s");

    acc
}

#[cfg(feature = "logging")]
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "wildrun=debug" } else { "wildrun=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}
