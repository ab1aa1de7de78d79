use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures while reconstructing a build context from persisted state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Project not configured (run 'configure' first): {path}")]
    NotConfigured {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't parse persisted configuration '{path}'.\n{source}")]
    Corrupt {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Couldn't load cached environment '{name}'.\n{source}")]
    EnvCache {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't determine the current directory.\n{0}")]
    CurrentDir(std::io::Error),

    #[error("Build engine failed while creating tasks:\n{0}")]
    Engine(anyhow::Error),
}

/// Failures of the wildcard task locator.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("Unable to find build target matching {0}")]
    NoMatchingTarget(String),

    #[error("Failed to build {key}: {status}")]
    TaskExecution { key: Utf8PathBuf, status: i32 },

    #[error("Failed to build {key}:\n{source}")]
    Action {
        key: Utf8PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Couldn't write task description.\n{0}")]
    Output(std::io::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Command '{0}' must accept a context, only init, shutdown and dist* may take none")]
    BareHandlerNotAllowed(String),
}

/// Failures that escape the command dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Command '{command}' failed:\n{source}")]
    Handler {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Couldn't rewrite compile targets.\n{0}")]
    Targets(#[from] ConfigError),

    #[error("Unknown command '{command}':\n{source}")]
    Missing {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}
