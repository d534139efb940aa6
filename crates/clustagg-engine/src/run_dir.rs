use crate::config::AggregatorConfig;
use crate::fsutil::dir_name;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One benchmark execution's output directory, e.g. `out_apptainer-202505301205`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    pub path: PathBuf,
    pub source_dir: String,
    pub backend: Option<String>,
    pub timestamp: Option<String>,
}

impl RunDirectory {
    pub fn from_path(path: &Path) -> Option<Self> {
        let source_dir = dir_name(path)?.to_string();
        let (backend, timestamp) = parse_run_directory_name(&source_dir)?;
        Some(Self {
            path: path.to_path_buf(),
            source_dir,
            backend: Some(backend),
            timestamp: Some(timestamp),
        })
    }
}

fn run_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^out[_-](.+?)[_-](\d+)$").expect("valid run dir regex"))
}

/// Splits `out_<backend>-<timestamp>` or `out-<backend>_<timestamp>` into
/// `(backend, timestamp)`.
pub fn parse_run_directory_name(name: &str) -> Option<(String, String)> {
    let caps = run_dir_re().captures(name)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// The root itself when its name is a run directory, otherwise its
/// immediate children that are, sorted by name.
pub fn discover_run_directories(root: &Path) -> Vec<RunDirectory> {
    let root = strip_trailing_dot(root);
    if let Some(run) = RunDirectory::from_path(&root).filter(|_| root.is_dir()) {
        return vec![run];
    }
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "cannot list root directory");
            return Vec::new();
        }
    };
    let mut runs: Vec<RunDirectory> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let run = RunDirectory::from_path(&p);
            if run.is_none() {
                debug!(dir = %p.display(), "not a run directory");
            }
            run
        })
        .collect();
    runs.sort_by(|a, b| a.path.cmp(&b.path));
    runs
}

pub fn score_files(run_dir: &Path, config: &AggregatorConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(run_dir)
        .follow_links(true)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.file_name().to_str() == Some(config.score_file_name.as_str())
                {
                    files.push(entry.into_path());
                }
            }
            Err(e) => warn!(run_dir = %run_dir.display(), error = %e, "skipping unreadable entry"),
        }
    }
    files
}

fn strip_trailing_dot(root: &Path) -> PathBuf {
    if dir_name(root).is_some() {
        return root.to_path_buf();
    }
    // `.`, `..` or `/`: name the directory by its canonical form
    fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}
