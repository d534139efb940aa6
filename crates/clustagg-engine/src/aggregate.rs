use crate::config::AggregatorConfig;
use crate::error::ScoreFileError;
use crate::fsutil::dir_name;
use crate::ground_truth::GroundTruthCache;
use crate::identity::resolve_identity;
use crate::performance::read_performance;
use crate::records::{MethodRunRecord, MetricRecord, RunTag};
use crate::run_dir::{discover_run_directories, score_files, RunDirectory};
use crate::scores::parse_score_file;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub run_directories: usize,
    pub score_files: usize,
    pub failed_files: usize,
    pub empty_files: usize,
    pub missing_true_k_scores: usize,
    pub duplicate_k_anomalies: usize,
    pub method_records: usize,
    pub metric_records: usize,
}

impl AggregationSummary {
    fn absorb(&mut self, other: &AggregationSummary) {
        self.run_directories += other.run_directories;
        self.score_files += other.score_files;
        self.failed_files += other.failed_files;
        self.empty_files += other.empty_files;
        self.missing_true_k_scores += other.missing_true_k_scores;
        self.duplicate_k_anomalies += other.duplicate_k_anomalies;
        self.method_records += other.method_records;
        self.metric_records += other.metric_records;
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: RunDirectory,
    pub method_records: Vec<MethodRunRecord>,
    pub metric_records: Vec<MetricRecord>,
    pub anomaly_files: Vec<PathBuf>,
    pub summary: AggregationSummary,
}

#[derive(Debug, Clone, Default)]
pub struct RootOutcome {
    pub root: PathBuf,
    pub root_name: String,
    pub method_records: Vec<MethodRunRecord>,
    pub metric_records: Vec<MetricRecord>,
    pub anomaly_files: Vec<PathBuf>,
    /// Backends and timestamps of the run directories that produced records.
    pub backends: BTreeSet<String>,
    pub timestamps: BTreeSet<String>,
    pub summary: AggregationSummary,
}

impl RootOutcome {
    pub fn has_records(&self) -> bool {
        !self.metric_records.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub method_records: Vec<MethodRunRecord>,
    pub metric_records: Vec<MetricRecord>,
    pub anomaly_files: Vec<PathBuf>,
    /// Set only when every contributing run directory agreed.
    pub backend: Option<String>,
    pub timestamp: Option<String>,
    /// Distinct backends in first-seen order.
    pub backends: Vec<String>,
    /// Names of the roots that contributed records.
    pub source_dirs: Vec<String>,
    pub summary: AggregationSummary,
}

impl Aggregation {
    pub fn from_roots(outcomes: Vec<RootOutcome>) -> Self {
        let mut out = Aggregation::default();
        let mut all_backends = BTreeSet::new();
        let mut all_timestamps = BTreeSet::new();
        for outcome in outcomes {
            out.summary.absorb(&outcome.summary);
            if !outcome.has_records() {
                continue;
            }
            for backend in &outcome.backends {
                if !out.backends.contains(backend) {
                    out.backends.push(backend.clone());
                }
            }
            all_backends.extend(outcome.backends);
            all_timestamps.extend(outcome.timestamps);
            out.source_dirs.push(outcome.root_name);
            out.method_records.extend(outcome.method_records);
            out.metric_records.extend(outcome.metric_records);
            out.anomaly_files.extend(outcome.anomaly_files);
        }
        out.backend = single(all_backends);
        out.timestamp = single(all_timestamps);
        out
    }

    pub fn distinct_datasets(&self) -> usize {
        self.method_records
            .iter()
            .map(|r| &r.identity.dataset)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn distinct_methods(&self) -> usize {
        self.method_records
            .iter()
            .map(|r| r.identity.method.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn distinct_metrics(&self) -> usize {
        self.metric_records
            .iter()
            .map(|r| r.metric.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

fn single(values: BTreeSet<String>) -> Option<String> {
    if values.len() == 1 {
        values.into_iter().next()
    } else {
        None
    }
}

/// Keeps the first record per (run, dataset, method, seed).
pub fn dedup_method_records(records: Vec<MethodRunRecord>) -> Vec<MethodRunRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .collect()
}

pub fn process_score_file(
    score_file: &Path,
    run: &RunDirectory,
    cache: &mut GroundTruthCache,
    config: &AggregatorConfig,
) -> Result<(MethodRunRecord, MetricRecord), ScoreFileError> {
    let resolved = resolve_identity(score_file, config);
    debug!(
        file = %score_file.display(),
        dataset = ?resolved.dataset.source(),
        method = ?resolved.method.source(),
        seed = ?resolved.seed.source(),
        metric = ?resolved.metric.source(),
        "resolved identity"
    );
    let (identity, metric) = resolved.into_identity();
    let ground_truth = cache.get_or_resolve(&identity.dataset, score_file, Some(&run.path), config);
    let performance = read_performance(score_file, config);
    let parsed = parse_score_file(score_file)?;

    if parsed.empty_file {
        warn!(file = %score_file.display(), "empty score file");
    }
    for dup in &parsed.divergent_duplicates {
        warn!(
            file = %score_file.display(),
            column = %dup.column,
            first = dup.first,
            duplicate = dup.duplicate,
            "duplicate k with diverging scores"
        );
    }

    let (score, missing_true_k_score) = parsed.score_at(ground_truth.true_k);
    let tag = RunTag::from(run);
    let method_record = MethodRunRecord {
        run: tag.clone(),
        identity: identity.clone(),
        ground_truth,
        performance,
    };
    let metric_record = MetricRecord {
        run: tag,
        identity,
        ground_truth,
        metric,
        scores: parsed.scores,
        extra_columns: parsed.extra_columns,
        score,
        duplicate_k_anomaly: parsed.duplicate_k_anomaly,
        empty_file: parsed.empty_file,
        missing_true_k_score,
        file_path: score_file.to_path_buf(),
    };
    Ok((method_record, metric_record))
}

/// Processes every score file of one run directory sequentially. The ground
/// truth cache lives for this call only.
pub fn process_run_directory(run: &RunDirectory, config: &AggregatorConfig) -> RunOutcome {
    let files = score_files(&run.path, config);
    info!(
        run = %run.source_dir,
        backend = run.backend.as_deref().unwrap_or("unknown"),
        timestamp = run.timestamp.as_deref().unwrap_or("unknown"),
        score_files = files.len(),
        "processing run directory"
    );

    let mut cache = GroundTruthCache::new();
    let mut method_records = Vec::with_capacity(files.len());
    let mut metric_records = Vec::with_capacity(files.len());
    let mut summary = AggregationSummary {
        run_directories: 1,
        score_files: files.len(),
        ..AggregationSummary::default()
    };

    for (i, file) in files.iter().enumerate() {
        if i > 0 && i % 100 == 0 {
            debug!(run = %run.source_dir, done = i, total = files.len(), "progress");
        }
        match process_score_file(file, run, &mut cache, config) {
            Ok((method_record, metric_record)) => {
                method_records.push(method_record);
                metric_records.push(metric_record);
            }
            Err(e) => {
                warn!(file = %e.path().display(), error = %e, "dropping score file");
                summary.failed_files += 1;
            }
        }
    }

    let method_records = dedup_method_records(method_records);
    let anomaly_files: Vec<PathBuf> = metric_records
        .iter()
        .filter(|r| r.duplicate_k_anomaly)
        .map(|r| r.file_path.clone())
        .collect();
    summary.empty_files = metric_records.iter().filter(|r| r.empty_file).count();
    summary.missing_true_k_scores = metric_records
        .iter()
        .filter(|r| r.missing_true_k_score)
        .count();
    summary.duplicate_k_anomalies = anomaly_files.len();
    summary.method_records = method_records.len();
    summary.metric_records = metric_records.len();
    debug!(run = %run.source_dir, datasets = cache.len(), "ground truth cache discarded");

    RunOutcome {
        run: run.clone(),
        method_records,
        metric_records,
        anomaly_files,
        summary,
    }
}

pub fn process_root(root: &Path, config: &AggregatorConfig) -> RootOutcome {
    let root_name = dir_name(root)
        .map(str::to_string)
        .unwrap_or_else(|| root.display().to_string());
    let mut outcome = RootOutcome {
        root: root.to_path_buf(),
        root_name,
        ..RootOutcome::default()
    };

    let runs = discover_run_directories(root);
    if runs.is_empty() {
        warn!(root = %root.display(), "no run directories found");
        return outcome;
    }

    for run in &runs {
        let run_outcome = process_run_directory(run, config);
        outcome.summary.absorb(&run_outcome.summary);
        if !run_outcome.metric_records.is_empty() {
            outcome.backends.extend(run_outcome.run.backend.clone());
            outcome.timestamps.extend(run_outcome.run.timestamp.clone());
        }
        outcome.method_records.extend(run_outcome.method_records);
        outcome.metric_records.extend(run_outcome.metric_records);
        outcome.anomaly_files.extend(run_outcome.anomaly_files);
    }
    outcome
}

/// Processes every root, in parallel across roots when more than one worker
/// and more than one root are available. Output order follows `roots`.
pub fn aggregate_roots(roots: &[PathBuf], config: &AggregatorConfig) -> Result<Aggregation> {
    let outcomes: Vec<RootOutcome> = if config.workers > 1 && roots.len() > 1 {
        let threads = config.workers.min(roots.len());
        info!(threads, roots = roots.len(), "processing roots in parallel");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("failed to build worker pool")?;
        pool.install(|| {
            roots
                .par_iter()
                .map(|root| process_root(root, config))
                .collect()
        })
    } else {
        roots.iter().map(|root| process_root(root, config)).collect()
    };
    Ok(Aggregation::from_roots(outcomes))
}
