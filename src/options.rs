use camino::Utf8PathBuf;

use crate::error::ConfigError;

/// Default name of the lockfile written by `configure` in the run directory.
pub const LOCKFILE: &str = ".lock-wildrun";

/// Process-wide settings for one invocation of the tool.
///
/// Passed explicitly to the loader, the target normalizer and the dispatch
/// loop, which may rewrite some fields in place.
#[derive(Debug, Clone)]
pub struct Options {
    /// Comma separated list of targets to restrict a build to.
    pub compile_targets: Option<String>,
    /// Whether a progress bar owns the terminal.
    pub progress_bar: bool,
    pub install: bool,
    pub uninstall: bool,
    /// Location of the lockfile, relative to the current directory unless absolute.
    pub lockfile: Utf8PathBuf,
    pub verbose: bool,
    /// Directory the tool was started from. Falls back to the process
    /// working directory when unset.
    pub launch_dir: Option<Utf8PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            compile_targets: None,
            progress_bar: false,
            install: false,
            uninstall: false,
            lockfile: Utf8PathBuf::from(LOCKFILE),
            verbose: false,
            launch_dir: None,
        }
    }
}

impl Options {
    /// Requested targets, or `None` when the option is missing or blank.
    pub fn targets(&self) -> Option<&str> {
        self.compile_targets
            .as_deref()
            .filter(|targets| !targets.is_empty())
    }

    /// Directory that user supplied paths are relative to.
    pub fn launch_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        match &self.launch_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
                Ok(Utf8PathBuf::try_from(cwd)?)
            }
        }
    }
}
