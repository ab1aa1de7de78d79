use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::core::{Artifact, TaskGraph};

/// Name of the only build variant; outputs live in `<out_dir>/default`.
pub const VARIANT: &str = "default";

/// Whether the current context installs files, removes them, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    #[default]
    None,
    Install,
    Uninstall,
}

/// Kind of a declared build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Library,
    Binary,
    Module,
    Python,
    Subsystem,
    #[serde(other)]
    Other,
}

/// Target name to target type, filled in by the build engine while it
/// creates tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetTypes(BTreeMap<String, TargetType>);

impl TargetTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, kind: TargetType) {
        self.0.insert(name.into(), kind);
    }

    pub fn get(&self, name: &str) -> Option<&TargetType> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

impl<S: Into<String>> FromIterator<(S, TargetType)> for TargetTypes {
    fn from_iter<I: IntoIterator<Item = (S, TargetType)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One cached configuration environment as persisted by `configure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSet(BTreeMap<String, serde_json::Value>);

impl ConfigSet {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }
}

/// Everything known about one build, reconstructed from persisted state.
///
/// A context is created fresh by [`crate::Loader::load`] and is never
/// written back to disk.
#[derive(Debug)]
pub struct BuildContext {
    /// Project source root.
    pub top_dir: Utf8PathBuf,
    /// Build output root.
    pub out_dir: Utf8PathBuf,
    /// Directory `configure` was run from.
    pub run_dir: Utf8PathBuf,
    pub graph: TaskGraph,
    /// Cached environments keyed by name, `default` being the main one.
    pub envs: BTreeMap<String, ConfigSet>,
    pub install: InstallMode,
    target_types: TargetTypes,
}

impl BuildContext {
    pub fn new(top_dir: Utf8PathBuf, out_dir: Utf8PathBuf, run_dir: Utf8PathBuf) -> Self {
        Self {
            top_dir,
            out_dir,
            run_dir,
            graph: TaskGraph::new(),
            envs: BTreeMap::new(),
            install: InstallMode::None,
            target_types: TargetTypes::new(),
        }
    }

    pub fn top_dir(&self) -> &Utf8Path {
        &self.top_dir
    }

    /// Directory mirroring the source tree that build outputs are written to.
    pub fn variant_dir(&self) -> Utf8PathBuf {
        self.out_dir.join(VARIANT)
    }

    /// Path of `artifact` relative to the top of the project. Outputs inside
    /// the variant directory are measured from it, so `bin/default/lib/a.o`
    /// and `lib/a.c` both sit under `lib/`.
    pub fn path_from_top(&self, artifact: &Artifact) -> Utf8PathBuf {
        let variant = self.variant_dir();
        if artifact.path().starts_with(&variant) {
            artifact.path_from(&variant)
        } else {
            artifact.path_from(&self.top_dir)
        }
    }

    pub fn env(&self, name: &str) -> Option<&ConfigSet> {
        self.envs.get(name)
    }

    pub fn target_types(&self) -> &TargetTypes {
        &self.target_types
    }

    pub fn target_types_mut(&mut self) -> &mut TargetTypes {
        &mut self.target_types
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_target_types_from_json() {
        let types: TargetTypes =
            serde_json::from_str(r#"{"talloc":"library","smbd":"binary","x":"plugin"}"#).unwrap();

        assert_eq!(types.get("talloc"), Some(&TargetType::Library));
        assert_eq!(types.get("smbd"), Some(&TargetType::Binary));
        assert_eq!(types.get("x"), Some(&TargetType::Other));
        assert!(!types.contains("missing"));
    }

    #[test]
    fn test_path_from_top_strips_variant() {
        let ctx = BuildContext::new("/proj".into(), "/proj/bin".into(), "/proj".into());

        let output = Artifact::new(Utf8Path::new("/proj/bin/default/lib"), "a.o");
        let source = Artifact::new(Utf8Path::new("/proj/lib"), "a.c");
        let stray = Artifact::new(Utf8Path::new("/proj/bin/other"), "b.o");

        assert_eq!(ctx.path_from_top(&output), "lib/a.o");
        assert_eq!(ctx.path_from_top(&source), "lib/a.c");
        assert_eq!(ctx.path_from_top(&stray), "bin/other/b.o");
    }

    #[test]
    fn test_config_set() {
        let mut env = ConfigSet::default();
        env.set("PREFIX", "/usr/local");
        env.set("JOBS", 4);

        assert_eq!(env.get_str("PREFIX"), Some("/usr/local"));
        assert_eq!(env.get_str("JOBS"), None);
        assert_eq!(env.get("JOBS"), Some(&serde_json::json!(4)));
    }
}
