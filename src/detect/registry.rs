use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// A model selected for one dispatcher run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelHandle {
    name: String,
    path: PathBuf,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Models available in the model directory, scanned once at startup.
///
/// Models are identified by file name (e.g. `yolo11n.onnx`) and listed in
/// name order; the first one is the default.
#[derive(Clone, Debug)]
pub struct ModelRegistry {
    dir: PathBuf,
    models: Vec<String>,
}

impl ModelRegistry {
    /// Scan `dir` for regular files with the given extension (case-insensitive).
    pub fn scan<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(anyhow!(
                "model directory {} not found or not a directory",
                dir.display()
            ));
        }
        let extension = extension.trim_start_matches('.');
        let entries = fs::read_dir(dir)
            .with_context(|| format!("read model directory {}", dir.display()))?;

        let mut models = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("list {}", dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if !matches {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                models.push(name.to_string());
            }
        }
        Ok(Self::from_names(dir, models))
    }

    /// Build a registry from known names without touching the filesystem.
    pub fn from_names<P: AsRef<Path>>(dir: P, names: Vec<String>) -> Self {
        let mut models = names;
        models.sort();
        models.dedup();
        Self {
            dir: dir.as_ref().to_path_buf(),
            models,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List available model names.
    pub fn list(&self) -> &[String] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.iter().any(|model| model == name)
    }

    /// The model selected when nothing else has been chosen.
    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    /// Resolve a model name to a handle.
    pub fn resolve(&self, name: &str) -> Result<ModelHandle> {
        if !self.contains(name) {
            return Err(anyhow!("model '{}' not found in {}", name, self.dir.display()));
        }
        Ok(ModelHandle::new(name, self.dir.join(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_lists_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.onnx", "a.ONNX", "notes.txt", "c.pt"] {
            fs::write(dir.path().join(name), b"weights").unwrap();
        }
        fs::create_dir(dir.path().join("nested.onnx")).unwrap();

        let registry = ModelRegistry::scan(dir.path(), ".onnx").unwrap();
        assert_eq!(registry.list(), ["a.ONNX".to_string(), "b.onnx".to_string()]);
        assert_eq!(registry.default_model(), Some("a.ONNX"));
        assert!(!registry.contains("c.pt"));
    }

    #[test]
    fn scan_of_empty_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::scan(dir.path(), "onnx").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.default_model(), None);
    }

    #[test]
    fn scan_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelRegistry::scan(dir.path().join("missing"), "onnx").is_err());
    }

    #[test]
    fn resolve_joins_directory() {
        let registry = ModelRegistry::from_names("/models", vec!["yolo.onnx".into()]);
        let handle = registry.resolve("yolo.onnx").unwrap();
        assert_eq!(handle.name(), "yolo.onnx");
        assert_eq!(handle.path(), Path::new("/models/yolo.onnx"));
        assert!(registry.resolve("other.onnx").is_err());
    }
}
