//! Project parsing using rayon
//!
//! Discovers source files under each root and parses them on a worker pool,
//! one [`CParser`] per worker over a shared, frozen macro table.

use cmodel_core::config::CompiledFilters;
use cmodel_core::{Config, Error, FileModel, ProjectModel, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cache::CacheStats;
use crate::pipeline::CParser;
use crate::preprocessor::{MacroTable, PreprocessorEvaluator};

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress event for tracking parsing progress
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Parsing phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Scanning,
    Parsing,
    Linking,
    Complete,
}

/// Source files under `root` accepted by `config`, sorted
pub fn discover_files(root: &Path, config: &Config, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::FileRead {
            path: root.to_path_buf(),
            reason: "source root does not exist".into(),
        });
    }
    let filters = config.file_filters.compile()?;

    let walker = WalkDir::new(root).max_depth(if recursive { usize::MAX } else { 1 });
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e, config))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_extension(e.path(), &config.extensions))
        .filter(|e| accepts(&filters, root, e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn is_excluded_dir(entry: &DirEntry, config: &Config) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.')
        || (entry.file_type().is_dir() && config.exclude_dirs.iter().any(|d| *d == name))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

fn accepts(filters: &CompiledFilters, root: &Path, path: &Path) -> bool {
    filters.accepts(&relative_key(root, path))
}

/// `path` relative to `root` with forward slashes
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = if root.is_file() {
        path.file_name().map(Path::new).unwrap_or(path)
    } else {
        path.strip_prefix(root).unwrap_or(path)
    };
    relative.to_string_lossy().replace('\\', "/")
}

/// Parses whole projects into a [`ProjectModel`]
///
/// Worker parsers are pooled and reused by later `parse_project` calls, so
/// unchanged files can be served from their content caches. Which pooled
/// parser picks up a file is up to rayon; only sequential runs are
/// guaranteed to see every file they parsed before.
pub struct ProjectParser {
    config: Config,
    evaluator: Arc<PreprocessorEvaluator>,
    progress_callback: Option<Arc<ProgressCallback>>,
    parsers: Mutex<Vec<CParser>>,
}

impl ProjectParser {
    /// The macro table is taken from `config.defines` and frozen here
    pub fn new(config: Config) -> Self {
        let evaluator = PreprocessorEvaluator::with_macros(MacroTable::from(&config.defines));
        Self {
            config,
            evaluator: Arc::new(evaluator),
            progress_callback: None,
            parsers: Mutex::new(Vec::new()),
        }
    }

    /// Set progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cache statistics of each pooled parser
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        match self.parsers.lock() {
            Ok(pool) => pool.iter().map(CParser::cache_stats).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Forget every cached file model
    pub fn clear_cache(&self) {
        if let Ok(mut pool) = self.parsers.lock() {
            pool.iter_mut().for_each(CParser::clear_cache);
        }
    }

    /// Parse every source file under `roots`
    pub fn parse_project(&self, roots: &[PathBuf], recursive: bool) -> Result<ProjectModel> {
        self.emit_progress(ProgressPhase::Scanning, 0, 0, "Scanning source roots...");

        let mut jobs: Vec<(String, PathBuf)> = Vec::new();
        for root in roots {
            for path in discover_files(root, &self.config, recursive)? {
                jobs.push((relative_key(root, &path), path));
            }
        }
        if jobs.is_empty() {
            let names: Vec<String> = roots.iter().map(|r| r.display().to_string()).collect();
            return Err(Error::NoInputFiles(names.join(", ")));
        }

        info!("Found {} files to parse", jobs.len());
        self.emit_progress(
            ProgressPhase::Scanning,
            jobs.len(),
            jobs.len(),
            format!("Found {} files", jobs.len()),
        );

        let parsed = self.parse_files(&jobs);

        self.emit_progress(ProgressPhase::Linking, 0, parsed.len(), "Merging file models...");
        let source_roots = roots.iter().map(|r| r.display().to_string()).collect();
        let mut model = ProjectModel::new(self.config.project_name.as_str(), source_roots);
        let failed = jobs.len() - parsed.len();
        for (key, file) in parsed {
            model.add_file(key, file);
        }
        model.compute_include_relations(self.config.include_depth);

        info!(
            "Parsed {} files ({} failed), {} distinct includes",
            model.files.len(),
            failed,
            model.global_includes.len()
        );
        self.emit_progress(
            ProgressPhase::Complete,
            model.files.len(),
            jobs.len(),
            "Parsing complete",
        );
        Ok(model)
    }

    /// Parse `(key, path)` jobs; failures are logged and dropped. Results
    /// keep the job order.
    fn parse_files(&self, jobs: &[(String, PathBuf)]) -> Vec<(String, FileModel)> {
        let total = jobs.len();
        let processed = AtomicUsize::new(0);

        self.emit_progress(ProgressPhase::Parsing, 0, total, "Starting parse...");

        let parse_one = |parser: &mut CParser, (key, path): &(String, PathBuf)| {
            let result = parser.parse_file(path);

            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            if current % 10 == 0 || current == total {
                self.emit_progress(
                    ProgressPhase::Parsing,
                    current,
                    total,
                    format!("Parsed {}/{} files", current, total),
                );
            }

            match result {
                Ok(mut file) => {
                    debug!("Parsed {}", key);
                    file.file_path = key.clone();
                    Some((key.clone(), file))
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            }
        };

        if self.config.parallel {
            jobs.par_iter()
                .map_init(
                    || self.checkout(),
                    |slot: &mut PooledParser<'_>, job| parse_one(slot.get(), job),
                )
                .flatten()
                .collect()
        } else {
            let mut slot = self.checkout();
            let parsed = jobs
                .iter()
                .filter_map(|job| parse_one(slot.get(), job))
                .collect();
            parsed
        }
    }

    /// A pooled parser, or a new one when the pool is empty
    fn checkout(&self) -> PooledParser<'_> {
        let parser = self.parsers.lock().ok().and_then(|mut pool| pool.pop());
        PooledParser {
            owner: self,
            parser,
        }
    }

    fn emit_progress<S: Into<String>>(
        &self,
        phase: ProgressPhase,
        current: usize,
        total: usize,
        message: S,
    ) {
        if let Some(ref callback) = self.progress_callback {
            callback(ProgressEvent {
                phase,
                current,
                total,
                message: message.into(),
            });
        }
    }
}

/// A worker's parser, returned to the pool on drop
struct PooledParser<'p> {
    owner: &'p ProjectParser,
    parser: Option<CParser>,
}

impl PooledParser<'_> {
    fn get(&mut self) -> &mut CParser {
        let owner = self.owner;
        self.parser.get_or_insert_with(|| {
            CParser::with_cache_capacity(Arc::clone(&owner.evaluator), owner.config.cache_capacity)
        })
    }
}

impl Drop for PooledParser<'_> {
    fn drop(&mut self) {
        if let Some(parser) = self.parser.take() {
            if let Ok(mut pool) = self.owner.parsers.lock() {
                pool.push(parser);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn keys(model: &ProjectModel) -> Vec<&str> {
        model.files.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_discover_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "main.c", "int main(void) { return 0; }");
        write(dir.path(), "util/list.h", "struct list;");
        write(dir.path(), "build/gen.c", "int generated;");
        write(dir.path(), ".hidden/x.c", "int hidden;");
        write(dir.path(), "README.md", "# readme");

        let config = Config::default();
        let files = discover_files(dir.path(), &config, true).unwrap();
        let rel: Vec<String> = files.iter().map(|p| relative_key(dir.path(), p)).collect();
        assert_eq!(rel, vec!["main.c".to_string(), "util/list.h".to_string()]);

        let flat = discover_files(dir.path(), &config, false).unwrap();
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn test_discover_with_filters() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.c", "int a;");
        write(dir.path(), "src/a_test.c", "int t;");
        write(dir.path(), "include/a.h", "int h;");

        let mut config = Config::default();
        config.file_filters.include = vec![r"^src/".into()];
        config.file_filters.exclude = vec![r"_test\.c$".into()];
        let files = discover_files(dir.path(), &config, true).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/a.c"));
    }

    #[test]
    fn test_missing_root() {
        let config = Config::default();
        let err = discover_files(Path::new("/nonexistent/cmodel/root"), &config, true);
        assert!(matches!(err, Err(Error::FileRead { .. })));
    }

    #[test]
    fn test_parse_project() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "point.h",
            "#include <stdint.h>\nstruct Point { int32_t x; int32_t y; };\n",
        );
        write(dir.path(), "main.c", "#include \"point.h\"\nint main(void) { return 0; }\n");
        for i in 0..12 {
            write(dir.path(), &format!("gen/f{}.c", i), &format!("void func{}(void) {{}}\n", i));
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let parser = ProjectParser::new(Config::default())
            .with_progress(move |e| sink.lock().unwrap().push(e.phase));
        let model = parser.parse_project(&[dir.path().to_path_buf()], true).unwrap();

        assert_eq!(model.files.len(), 14);
        assert_eq!(keys(&model)[..2].to_vec(), vec!["gen/f0.c", "gen/f1.c"]);
        assert!(model.files["point.h"].structs.contains_key("Point"));
        assert_eq!(model.files["main.c"].file_path, "main.c");

        let includes: Vec<&str> = model.global_includes.iter().map(String::as_str).collect();
        assert!(includes.contains(&"stdint.h"));
        assert!(includes.contains(&"point.h"));

        let relations = &model.files["main.c"].include_relations;
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].included_file, "point.h");

        let phases = events.lock().unwrap();
        assert_eq!(phases.first(), Some(&ProgressPhase::Scanning));
        assert_eq!(phases.last(), Some(&ProgressPhase::Complete));
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.c", "typedef struct { struct { int v; } inner; } A;\n");
        write(dir.path(), "b.c", "enum mode { OFF, ON = 4 };\nstatic int counter = 0;\n");

        let roots = [dir.path().to_path_buf()];
        let parallel = ProjectParser::new(Config::default())
            .parse_project(&roots, true)
            .unwrap();
        let config = Config {
            parallel: false,
            ..Config::default()
        };
        let sequential = ProjectParser::new(config).parse_project(&roots, true).unwrap();

        assert_eq!(parallel.files, sequential.files);
    }

    #[test]
    fn test_pooled_parsers_reuse_cache() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.c", "int a;");
        write(dir.path(), "b.c", "int b;");

        let config = Config {
            parallel: false,
            ..Config::default()
        };
        let parser = ProjectParser::new(config);
        let roots = [dir.path().to_path_buf()];
        let first = parser.parse_project(&roots, true).unwrap();
        let second = parser.parse_project(&roots, true).unwrap();
        assert_eq!(first.files, second.files);

        let stats = parser.cache_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!((stats[0].hits, stats[0].misses, stats[0].entries), (2, 2, 2));

        parser.clear_cache();
        parser.parse_project(&roots, true).unwrap();
        assert_eq!(parser.cache_stats()[0].misses, 4);
    }

    #[test]
    fn test_defines_select_branches() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "cfg.c",
            "#ifdef USE_FAST\nint fast_path;\n#else\nint slow_path;\n#endif\n",
        );

        let mut config = Config::default();
        config.define("USE_FAST", "1");
        let model = ProjectParser::new(config)
            .parse_project(&[dir.path().to_path_buf()], true)
            .unwrap();
        let globals: Vec<&str> = model.files["cfg.c"]
            .globals
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(globals, vec!["fast_path"]);
    }

    #[test]
    fn test_no_input_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes.txt", "nothing to parse");
        let result =
            ProjectParser::new(Config::default()).parse_project(&[dir.path().to_path_buf()], true);
        assert!(matches!(result, Err(Error::NoInputFiles(_))));
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "ok.c", "int ok;");
        let parser = ProjectParser::new(Config::default());
        let jobs = vec![
            ("ok.c".to_string(), dir.path().join("ok.c")),
            ("gone.c".to_string(), dir.path().join("gone.c")),
        ];
        let parsed = parser.parse_files(&jobs);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "ok.c");
    }
}
