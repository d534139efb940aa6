use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn one score file into a record pair. The aggregator logs it
/// and drops that file; the run continues.
#[derive(Debug, Error)]
pub enum ScoreFileError {
    #[error("cannot open score file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decompress score file {path}: {source}")]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed score table in {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ScoreFileError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ScoreFileError::Open { path, .. }
            | ScoreFileError::Decompress { path, .. }
            | ScoreFileError::Table { path, .. } => path,
        }
    }
}
