use crate::config::AggregatorConfig;
use crate::fsutil::{ancestors_within, dir_name, read_gz_to_string, read_json_object};
use crate::identity::parse_dataset_dir_name;
use crate::records::DatasetIdentity;
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// True cluster count and noise presence of a dataset. Both `None` means no
/// usable label file was found, which is an expected outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroundTruth {
    pub true_k: Option<u32>,
    pub has_noise: Option<bool>,
}

impl GroundTruth {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// `true_k` counts distinct non-zero labels; label `0` marks noise.
    pub fn from_labels(labels: &[i64]) -> Self {
        let distinct: BTreeSet<i64> = labels.iter().copied().collect();
        let has_noise = distinct.contains(&0);
        let true_k = distinct.iter().filter(|l| **l != 0).count() as u32;
        Self {
            true_k: Some(true_k),
            has_noise: Some(has_noise),
        }
    }
}

/// Ground truth per dataset, scoped to the processing of one run directory.
#[derive(Debug, Default)]
pub struct GroundTruthCache {
    entries: HashMap<DatasetIdentity, GroundTruth>,
}

impl GroundTruthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_resolve(
        &mut self,
        dataset: &DatasetIdentity,
        score_file: &Path,
        run_dir: Option<&Path>,
        config: &AggregatorConfig,
    ) -> GroundTruth {
        if dataset.is_empty() {
            return GroundTruth::unknown();
        }
        if let Some(hit) = self.entries.get(dataset) {
            return *hit;
        }
        let resolved = resolve_ground_truth(dataset, score_file, run_dir, config);
        debug!(
            dataset = %dataset,
            true_k = ?resolved.true_k,
            has_noise = ?resolved.has_noise,
            "resolved ground truth"
        );
        self.entries.insert(dataset.clone(), resolved);
        resolved
    }
}

pub fn resolve_ground_truth(
    dataset: &DatasetIdentity,
    score_file: &Path,
    run_dir: Option<&Path>,
    config: &AggregatorConfig,
) -> GroundTruth {
    let dataset_dir = locate_dataset_dir(score_file, config)
        .or_else(|| run_dir.and_then(|run| find_dataset_dir_in_run(run, dataset, config)));
    match dataset_dir {
        Some(dir) => ground_truth_from_dir(&dir, config),
        None => GroundTruth::unknown(),
    }
}

pub fn locate_dataset_dir(score_file: &Path, config: &AggregatorConfig) -> Option<PathBuf> {
    let start = score_file.parent()?;
    ancestors_within(start, config.dataset_search_depth)
        .find(|dir| dir_name(dir).and_then(parse_dataset_dir_name).is_some())
        .map(Path::to_path_buf)
}

/// Scans `<run>/data/clustbench/*` for a directory whose sidecar names the dataset.
pub fn find_dataset_dir_in_run(
    run_dir: &Path,
    dataset: &DatasetIdentity,
    config: &AggregatorConfig,
) -> Option<PathBuf> {
    let data_root = run_dir.join("data").join("clustbench");
    let mut candidates: Vec<PathBuf> = fs::read_dir(&data_root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    candidates.sort();
    candidates.into_iter().find(|dir| {
        read_json_object(&dir.join(&config.parameters_file_name)).is_some_and(|params| {
            let field = |key: &str| params.get(key).and_then(|v| v.as_str()).unwrap_or_default();
            field("dataset_generator") == dataset.generator && field("dataset_name") == dataset.name
        })
    })
}

pub fn label_files(dir: &Path, config: &AggregatorConfig) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| dir_name(p).is_some_and(|n| config.is_label_file_name(n)))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// First label file yielding `true_k > 0` wins. Unparsable files are skipped.
/// When every parsable file is all-noise, the first parsed one is used.
pub fn ground_truth_from_dir(dir: &Path, config: &AggregatorConfig) -> GroundTruth {
    let mut fallback = None;
    for file in label_files(dir, config) {
        match read_labels(&file) {
            Ok(labels) => {
                let truth = GroundTruth::from_labels(&labels);
                if truth.true_k.is_some_and(|k| k > 0) {
                    return truth;
                }
                fallback.get_or_insert(truth);
            }
            Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable label file"),
        }
    }
    fallback.unwrap_or_default()
}

/// Reads a gzip label file: one integer label per line. Integral floats such
/// as `2.0` are accepted, blank lines ignored.
pub fn read_labels(path: &Path) -> Result<Vec<i64>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = read_gz_to_string(&bytes)
        .with_context(|| format!("failed to decompress {}", path.display()))?;
    let mut labels = Vec::new();
    for (line_no, token) in text
        .lines()
        .enumerate()
        .flat_map(|(i, line)| line.split_whitespace().map(move |t| (i + 1, t)))
    {
        labels.push(
            parse_label(token)
                .ok_or_else(|| anyhow!("line {}: invalid label '{}'", line_no, token))?,
        );
    }
    Ok(labels)
}

fn parse_label(token: &str) -> Option<i64> {
    token.parse::<i64>().ok().or_else(|| {
        token
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_file, write_gz, write_labels, ScratchDir};

    const SCORE_REL: &str =
        "clustering/method-test/metrics/partition_metrics/metric-ari/clustbench.scores.gz";

    #[test]
    fn labels_without_noise() {
        let truth = GroundTruth::from_labels(&[1, 1, 2, 2, 1, 2, 1, 2]);
        assert_eq!(truth.true_k, Some(2));
        assert_eq!(truth.has_noise, Some(false));
    }

    #[test]
    fn labels_with_noise() {
        let truth = GroundTruth::from_labels(&[1, 1, 2, 0, 1, 2, 0, 2]);
        assert_eq!(truth.true_k, Some(2));
        assert_eq!(truth.has_noise, Some(true));
    }

    #[test]
    fn resolves_from_ancestor_dataset_directory() {
        let scratch = ScratchDir::new("gt_ancestor");
        let dataset_dir = scratch.mkdir("dataset_generator-fcps_dataset_name-atom");
        write_labels(
            &dataset_dir.join("clustbench.labels0.gz"),
            &[1, 1, 2, 0, 1, 2, 0, 2],
        );
        let score = dataset_dir.join(SCORE_REL);
        let dataset = DatasetIdentity::new("fcps", "atom");
        let truth = resolve_ground_truth(&dataset, &score, None, &AggregatorConfig::default());
        assert_eq!(truth.true_k, Some(2));
        assert_eq!(truth.has_noise, Some(true));
    }

    #[test]
    fn missing_label_file_is_unknown_not_zero() {
        let scratch = ScratchDir::new("gt_missing");
        let dataset_dir = scratch.mkdir("dataset_generator-fcps_dataset_name-atom");
        let score = dataset_dir.join(SCORE_REL);
        let dataset = DatasetIdentity::new("fcps", "atom");
        let truth = resolve_ground_truth(&dataset, &score, None, &AggregatorConfig::default());
        assert_eq!(truth, GroundTruth::unknown());
    }

    #[test]
    fn unparsable_label_file_is_skipped() {
        let scratch = ScratchDir::new("gt_skip");
        let dataset_dir = scratch.mkdir("dataset_generator-g_dataset_name-n");
        write_gz(&dataset_dir.join("clustbench.labels0.gz"), "1\nnot-a-label\n");
        write_gz(&dataset_dir.join("clustbench.labels1.gz"), "1.0\n2.0\n\n3.0\n");
        let truth = ground_truth_from_dir(&dataset_dir, &AggregatorConfig::default());
        assert_eq!(truth.true_k, Some(3));
        assert_eq!(truth.has_noise, Some(false));
    }

    #[test]
    fn first_file_with_positive_k_wins() {
        let scratch = ScratchDir::new("gt_first_positive");
        let dir = scratch.mkdir("dataset_generator-g_dataset_name-n");
        write_labels(&dir.join("clustbench.labels0.gz"), &[0, 0, 0]);
        write_labels(&dir.join("clustbench.labels1.gz"), &[1, 2, 3, 4]);
        write_labels(&dir.join("clustbench.labels2.gz"), &[1, 2]);
        let truth = ground_truth_from_dir(&dir, &AggregatorConfig::default());
        assert_eq!(truth.true_k, Some(4));
    }

    #[test]
    fn all_noise_file_falls_back_to_zero_clusters() {
        let scratch = ScratchDir::new("gt_all_noise");
        let dir = scratch.mkdir("dataset_generator-g_dataset_name-n");
        write_labels(&dir.join("clustbench.labels0.gz"), &[0, 0]);
        let truth = ground_truth_from_dir(&dir, &AggregatorConfig::default());
        assert_eq!(truth.true_k, Some(0));
        assert_eq!(truth.has_noise, Some(true));
    }

    #[test]
    fn falls_back_to_hash_named_dataset_directory() {
        let scratch = ScratchDir::new("gt_hash_dir");
        let run = scratch.mkdir("out_conda-202506231301");
        let hashed = scratch.mkdir("out_conda-202506231301/data/clustbench/.a1b2c3");
        write_file(
            &hashed.join("parameters.json"),
            r#"{"dataset_generator": "wut", "dataset_name": "x2"}"#,
        );
        write_labels(&hashed.join("clustbench.labels0.gz"), &[1, 2, 3, 0]);
        let score = run.join(
            "somewhere/method-km/metrics/partition_metrics/metric-ari/clustbench.scores.gz",
        );
        let dataset = DatasetIdentity::new("wut", "x2");
        let config = AggregatorConfig::default();
        let truth = resolve_ground_truth(&dataset, &score, Some(&run), &config);
        assert_eq!(truth.true_k, Some(3));
        assert_eq!(truth.has_noise, Some(true));

        let other = DatasetIdentity::new("wut", "x3");
        let unknown = resolve_ground_truth(&other, &score, Some(&run), &config);
        assert_eq!(unknown, GroundTruth::unknown());
    }

    #[test]
    fn cache_reuses_first_lookup() {
        let scratch = ScratchDir::new("gt_cache");
        let dataset_dir = scratch.mkdir("dataset_generator-fcps_dataset_name-atom");
        write_labels(&dataset_dir.join("clustbench.labels0.gz"), &[1, 2]);
        let score = dataset_dir.join(SCORE_REL);
        let dataset = DatasetIdentity::new("fcps", "atom");
        let config = AggregatorConfig::default();

        let mut cache = GroundTruthCache::new();
        let first = cache.get_or_resolve(&dataset, &score, None, &config);
        fs::remove_file(dataset_dir.join("clustbench.labels0.gz")).expect("remove labels");
        let second = cache.get_or_resolve(&dataset, &score, None, &config);
        assert_eq!(first, second);
        assert_eq!(first.true_k, Some(2));
        assert_eq!(cache.len(), 1);

        let empty = cache.get_or_resolve(&DatasetIdentity::default(), &score, None, &config);
        assert_eq!(empty, GroundTruth::unknown());
        assert_eq!(cache.len(), 1);
    }
}
