use crate::error::ScoreFileError;
use crate::fsutil::read_gz_to_string;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs;
use std::path::Path;

/// Largest difference tolerated between repeated scores for the same column.
pub const DUPLICATE_K_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreValue {
    Number(f64),
    Text(String),
}

impl ScoreValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) => ScoreValue::Number(v),
            Err(_) => ScoreValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScoreValue::Number(v) => Some(*v),
            ScoreValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreValue::Number(v) => write!(f, "{}", v),
            ScoreValue::Text(s) => f.write_str(s),
        }
    }
}

/// A repeated column whose value diverged from the first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct DivergentDuplicate {
    pub column: String,
    pub first: f64,
    pub duplicate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScores {
    pub scores: BTreeMap<u32, ScoreValue>,
    pub extra_columns: BTreeMap<String, ScoreValue>,
    pub duplicate_k_anomaly: bool,
    pub divergent_duplicates: Vec<DivergentDuplicate>,
    pub empty_file: bool,
}

impl ParsedScores {
    pub fn empty() -> Self {
        Self {
            empty_file: true,
            ..Self::default()
        }
    }

    /// Numeric score at `k = true_k`, and whether it is missing although
    /// `true_k` is known. Empty files never count as missing.
    pub fn score_at(&self, true_k: Option<u32>) -> (Option<f64>, bool) {
        let Some(k) = true_k else {
            return (None, false);
        };
        let score = self.scores.get(&k).and_then(ScoreValue::as_f64);
        (score, score.is_none() && !self.empty_file)
    }
}

/// `k=<n>` with `n > 0`.
pub fn parse_k_column(name: &str) -> Option<u32> {
    name.strip_prefix("k=")?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|k| *k > 0)
}

/// Reads a gzip score table. Zero-length or whitespace-only content and a
/// header without a data row are reported as `empty_file`; undecodable
/// content is an error.
pub fn parse_score_file(path: &Path) -> Result<ParsedScores, ScoreFileError> {
    let bytes = fs::read(path).map_err(|source| ScoreFileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Ok(ParsedScores::empty());
    }
    let text = read_gz_to_string(&bytes).map_err(|source| ScoreFileError::Decompress {
        path: path.to_path_buf(),
        source,
    })?;
    parse_score_table(&text).map_err(|source| ScoreFileError::Table {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the header row and the first data row of a score table.
pub fn parse_score_table(text: &str) -> Result<ParsedScores, csv::Error> {
    if text.trim().is_empty() {
        return Ok(ParsedScores::empty());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();
    let Some(header) = records.next().transpose()? else {
        return Ok(ParsedScores::empty());
    };
    let Some(data) = records.next().transpose()? else {
        return Ok(ParsedScores::empty());
    };

    let mut parsed = ParsedScores::default();
    for (raw_name, raw_value) in header.iter().zip(data.iter()) {
        let name = raw_name.trim().trim_matches('"').to_string();
        let value = ScoreValue::parse(raw_value);
        // `k=3` and `k=03` name the same column
        let first = match parse_k_column(&name) {
            Some(k) => match parsed.scores.entry(k) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                    continue;
                }
                Entry::Occupied(slot) => slot.get().as_f64(),
            },
            None => match parsed.extra_columns.entry(name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                    continue;
                }
                Entry::Occupied(slot) => slot.get().as_f64(),
            },
        };
        if let (Some(first), Some(duplicate)) = (first, value.as_f64()) {
            if (first - duplicate).abs() > DUPLICATE_K_EPSILON {
                parsed.duplicate_k_anomaly = true;
                parsed.divergent_duplicates.push(DivergentDuplicate {
                    column: name,
                    first,
                    duplicate,
                });
            }
        }
    }
    Ok(parsed)
}
