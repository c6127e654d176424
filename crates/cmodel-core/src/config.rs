//! Configuration types

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// cmodel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name recorded in the project model
    pub project_name: String,

    /// Source roots to scan
    pub source_folders: Vec<PathBuf>,

    /// Descend into subdirectories
    pub recursive: bool,

    /// File extensions to parse
    pub extensions: Vec<String>,

    /// Directory names to skip
    pub exclude_dirs: Vec<String>,

    /// Regex filters applied to relative file paths
    pub file_filters: FileFilters,

    /// How many include hops to record per file
    pub include_depth: usize,

    /// Macro table used for conditional compilation
    pub defines: IndexMap<String, String>,

    /// Parse files on a worker pool
    pub parallel: bool,

    /// Per-parser content cache size
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: "C_Project".into(),
            source_folders: Vec::new(),
            recursive: true,
            extensions: ["c", "h", "cpp", "cc", "cxx", "hpp", "hxx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: [".git", "build", "node_modules", "__pycache__", ".vscode", ".idea"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_filters: FileFilters::default(),
            include_depth: 1,
            defines: IndexMap::new(),
            parallel: true,
            cache_capacity: 100,
        }
    }
}

/// Include/exclude regular expressions for discovered files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilters {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl FileFilters {
    /// Compile the patterns
    pub fn compile(&self) -> Result<CompiledFilters> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| Error::Config(format!("invalid filter '{}': {}", p, e)))
                })
                .collect()
        };
        Ok(CompiledFilters {
            include: compile_all(&self.include)?,
            exclude: compile_all(&self.exclude)?,
        })
    }
}

/// Compiled form of [`FileFilters`]
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl CompiledFilters {
    /// An empty include list accepts everything not excluded
    pub fn accepts(&self, relative_path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|r| r.is_match(relative_path)) {
            return false;
        }
        !self.exclude.iter().any(|r| r.is_match(relative_path))
    }
}

impl Config {
    /// Load from a JSON file, or YAML for `.yml`/`.yaml`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject configurations that cannot drive a parse
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(Error::Config("no file extensions configured".into()));
        }
        self.file_filters.compile()?;
        Ok(())
    }

    /// Add or replace a macro definition
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.project_name, "C_Project");
        assert!(config.recursive);
        assert!(config.extensions.contains(&"h".to_string()));
        assert_eq!(config.include_depth, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_json_partial() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{"project_name": "fw", "defines": {"DEBUG": "1"}, "include_depth": 3}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.project_name, "fw");
        assert_eq!(config.defines.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(config.include_depth, 3);
        assert!(config.parallel);
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(
            &path,
            "project_name: fw\nrecursive: false\nfile_filters:\n  exclude: ['^test/']\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.recursive);
        let filters = config.file_filters.compile().unwrap();
        assert!(filters.accepts("src/main.c"));
        assert!(!filters.accepts("test/main.c"));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let mut config = Config::default();
        config.file_filters.include.push("(".into());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_include_filter() {
        let filters = FileFilters {
            include: vec![r"\.h$".into()],
            exclude: vec![],
        }
        .compile()
        .unwrap();
        assert!(filters.accepts("inc/api.h"));
        assert!(!filters.accepts("src/api.c"));
    }
}
