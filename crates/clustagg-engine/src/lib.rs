//! Reconciles clustbench run output trees into two denormalized fact tables:
//! one row per method run, one row per (method run, metric) score file.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ground_truth;
pub mod identity;
pub mod performance;
pub mod records;
pub mod run_dir;
pub mod scores;
pub mod writer;

mod fsutil;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregate::{
    aggregate_roots, dedup_method_records, process_root, process_run_directory,
    process_score_file, Aggregation, AggregationSummary, RootOutcome, RunOutcome,
};
pub use config::AggregatorConfig;
pub use error::ScoreFileError;
pub use ground_truth::{GroundTruth, GroundTruthCache};
pub use identity::{resolve_identity, Resolution, ResolutionSource, ResolvedIdentity};
pub use performance::{locate_method_dir, MethodDirLookup, MethodDirMatch, PerformanceFacts};
pub use records::{DatasetIdentity, MethodRunIdentity, MethodRunRecord, MetricRecord, RunTag};
pub use run_dir::{discover_run_directories, parse_run_directory_name, score_files, RunDirectory};
pub use scores::{parse_score_file, ParsedScores, ScoreValue, DUPLICATE_K_EPSILON};
pub use writer::{output_stem, write_tables, OutputFormat, WrittenTables};
