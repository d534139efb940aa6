use crate::ground_truth::GroundTruth;
use crate::performance::PerformanceFacts;
use crate::run_dir::RunDirectory;
use crate::scores::ScoreValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetIdentity {
    pub generator: String,
    pub name: String,
}

impl DatasetIdentity {
    pub fn new(generator: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generator.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.generator, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRunIdentity {
    pub dataset: DatasetIdentity,
    pub method: String,
    pub seed: Option<u64>,
}

/// Run-level columns stamped onto every record produced inside one run directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunTag {
    pub source_dir: String,
    pub backend: Option<String>,
    pub run_timestamp: Option<String>,
}

impl From<&RunDirectory> for RunTag {
    fn from(run: &RunDirectory) -> Self {
        Self {
            source_dir: run.source_dir.clone(),
            backend: run.backend.clone(),
            run_timestamp: run.timestamp.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodRunRecord {
    pub run: RunTag,
    pub identity: MethodRunIdentity,
    pub ground_truth: GroundTruth,
    pub performance: PerformanceFacts,
}

impl MethodRunRecord {
    pub fn dedup_key(&self) -> (RunTag, MethodRunIdentity) {
        (self.run.clone(), self.identity.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub run: RunTag,
    pub identity: MethodRunIdentity,
    pub ground_truth: GroundTruth,
    pub metric: String,
    /// Score per candidate cluster count, from the `k=<n>` columns.
    pub scores: BTreeMap<u32, ScoreValue>,
    /// Columns whose header is not `k=<n>`.
    pub extra_columns: BTreeMap<String, ScoreValue>,
    pub score: Option<f64>,
    pub duplicate_k_anomaly: bool,
    pub empty_file: bool,
    pub missing_true_k_score: bool,
    pub file_path: PathBuf,
}
