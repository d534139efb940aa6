use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Naming conventions and search bounds used while walking a run tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    pub score_file_name: String,
    pub labels_file_prefix: String,
    pub labels_file_suffix: String,
    pub parameters_file_name: String,
    pub legacy_performance_file_name: String,
    pub performance_descriptor_file_name: String,
    /// Parent directory names under which `linkage-*` directories form a compound method.
    pub linkage_libraries: Vec<String>,
    /// Directories searched for `parameters.json`, counting the score file's own.
    pub sidecar_search_depth: usize,
    pub dataset_search_depth: usize,
    pub method_search_depth: usize,
    pub workers: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            score_file_name: "clustbench.scores.gz".to_string(),
            labels_file_prefix: "clustbench.labels".to_string(),
            labels_file_suffix: ".gz".to_string(),
            parameters_file_name: "parameters.json".to_string(),
            legacy_performance_file_name: "clustbench_performance.txt".to_string(),
            performance_descriptor_file_name: "perf.json".to_string(),
            linkage_libraries: vec![
                "agglomerative".to_string(),
                "fastcluster".to_string(),
                "sklearn".to_string(),
            ],
            sidecar_search_depth: 5,
            dataset_search_depth: 10,
            method_search_depth: 10,
            workers: default_workers(),
        }
    }
}

impl AggregatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: AggregatorConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config.normalized())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.normalized()
    }

    pub fn is_label_file_name(&self, name: &str) -> bool {
        name.starts_with(&self.labels_file_prefix) && name.ends_with(&self.labels_file_suffix)
    }

    pub fn is_linkage_library(&self, name: &str) -> bool {
        self.linkage_libraries.iter().any(|lib| lib == name)
    }

    fn normalized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = 1;
        }
        self
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
