use crate::config::AggregatorConfig;
use crate::fsutil::{ancestors_within, dir_name, json_f64, json_u64, read_json_object};
use crate::identity::{parse_dataset_dir_name, parse_linkage_dir_name, parse_method_dir_name};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// metric-<m> -> partition_metrics -> metrics -> <method dir>
const FIXED_METHOD_DEPTH: usize = 3;

/// Execution and resource facts for one method run. `execution_time_seconds`
/// comes from the legacy tab-separated log, the rest from the structured
/// descriptor; the two are never reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceFacts {
    pub execution_time_seconds: Option<f64>,
    pub runtime: Option<f64>,
    pub threads: Option<u64>,
    pub disk_read: Option<u64>,
    pub disk_write: Option<u64>,
    pub avg_load: Option<f64>,
    pub peak_rss: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodDirMatch {
    /// A `method-<name>[_seed-<n>]` ancestor.
    Marker,
    /// A `linkage-*` ancestor nested under a known clustering library.
    Linkage,
    /// Three levels above the metric directory.
    FixedDepth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodDirLookup {
    Found {
        path: PathBuf,
        via: MethodDirMatch,
        symlink_resolved: bool,
    },
    NotFound,
}

impl MethodDirLookup {
    pub fn path(&self) -> Option<&Path> {
        match self {
            MethodDirLookup::Found { path, .. } => Some(path),
            MethodDirLookup::NotFound => None,
        }
    }
}

/// Finds the method directory of a score file with one bounded ascent.
///
/// Each level is tested against the marker predicates (nearest level wins);
/// the ascent stops at the dataset directory. Only if no level matches is the
/// fixed-depth structure tried. A symlinked result is resolved to its target.
pub fn locate_method_dir(score_file: &Path, config: &AggregatorConfig) -> MethodDirLookup {
    let Some(metric_dir) = score_file.parent() else {
        return MethodDirLookup::NotFound;
    };

    let mut found = None;
    for dir in ancestors_within(metric_dir, config.method_search_depth) {
        let Some(name) = dir_name(dir) else { break };
        if parse_dataset_dir_name(name).is_some() {
            break;
        }
        if parse_method_dir_name(name).is_some() {
            found = Some((dir.to_path_buf(), MethodDirMatch::Marker));
            break;
        }
        let is_linkage = dir
            .parent()
            .and_then(dir_name)
            .is_some_and(|library| parse_linkage_dir_name(library, name, config).is_some());
        if is_linkage {
            found = Some((dir.to_path_buf(), MethodDirMatch::Linkage));
            break;
        }
    }

    let found = found.or_else(|| {
        metric_dir
            .ancestors()
            .nth(FIXED_METHOD_DEPTH)
            .filter(|dir| dir.is_dir())
            .map(|dir| (dir.to_path_buf(), MethodDirMatch::FixedDepth))
    });

    match found {
        Some((path, via)) => {
            let (path, symlink_resolved) = resolve_symlink(path);
            MethodDirLookup::Found {
                path,
                via,
                symlink_resolved,
            }
        }
        None => MethodDirLookup::NotFound,
    }
}

fn resolve_symlink(path: PathBuf) -> (PathBuf, bool) {
    let is_link = fs::symlink_metadata(&path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_link {
        return (path, false);
    }
    match fs::canonicalize(&path) {
        Ok(real) => (real, true),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "dangling method directory symlink");
            (path, false)
        }
    }
}

pub fn read_performance(score_file: &Path, config: &AggregatorConfig) -> PerformanceFacts {
    let lookup = locate_method_dir(score_file, config);
    let Some(method_dir) = lookup.path() else {
        debug!(file = %score_file.display(), "no method directory found");
        return PerformanceFacts::default();
    };
    let mut facts = read_performance_descriptor(
        &method_dir.join(&config.performance_descriptor_file_name),
    );
    facts.execution_time_seconds =
        read_legacy_execution_time(&method_dir.join(&config.legacy_performance_file_name));
    facts
}

/// Value under the `s` column of a two-line tab-separated log.
pub fn read_legacy_execution_time(path: &Path) -> Option<f64> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable performance log");
            return None;
        }
    };
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next()?.trim().split('\t').collect();
    let data_line = lines.next()?.trim();
    if data_line.is_empty() {
        return None;
    }
    let column = header.iter().position(|h| h.trim() == "s")?;
    data_line
        .split('\t')
        .nth(column)
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// Resource facts from the structured descriptor; `execution_time_seconds`
/// is left unset. Absent keys stay `None` individually.
pub fn read_performance_descriptor(path: &Path) -> PerformanceFacts {
    let Some(doc) = read_json_object(path) else {
        return PerformanceFacts::default();
    };
    PerformanceFacts {
        execution_time_seconds: None,
        runtime: doc.get("total_time_secs").and_then(json_f64),
        threads: doc.get("max_threads").and_then(json_u64),
        disk_read: doc.get("total_disk_read_bytes").and_then(json_u64),
        disk_write: doc.get("total_disk_write_bytes").and_then(json_u64),
        avg_load: doc.get("avg_cpu_usage").and_then(json_f64),
        peak_rss: doc.get("peak_mem_rss_kb").and_then(json_u64),
    }
}
