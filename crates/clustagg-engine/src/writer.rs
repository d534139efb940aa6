use crate::aggregate::Aggregation;
use crate::records::{MethodRunRecord, MetricRecord};
use crate::scores::ScoreValue;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const METHOD_COLUMNS: [&str; 16] = [
    "source_dir",
    "backend",
    "run_timestamp",
    "dataset_generator",
    "dataset_name",
    "true_k",
    "has_noise",
    "method",
    "seed",
    "execution_time_seconds",
    "runtime",
    "threads",
    "disk_read",
    "disk_write",
    "avg_load",
    "peak_rss",
];

pub const METRIC_META_COLUMNS: [&str; 14] = [
    "source_dir",
    "backend",
    "run_timestamp",
    "dataset_generator",
    "dataset_name",
    "true_k",
    "has_noise",
    "method",
    "seed",
    "metric",
    "score",
    "duplicate_k_anomaly",
    "empty_file",
    "missing_true_k_score",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    Both,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Both => "both",
        }
    }

    fn csv(self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    fn json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrittenTables {
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Text(String),
    Int(u64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    fn text(s: &str) -> Self {
        Cell::Text(s.to_string())
    }

    fn opt_text(s: Option<&str>) -> Self {
        s.map(Cell::text).unwrap_or(Cell::Empty)
    }

    fn opt_int(v: Option<u64>) -> Self {
        v.map(Cell::Int).unwrap_or(Cell::Empty)
    }

    fn opt_float(v: Option<f64>) -> Self {
        v.map(Cell::Float).unwrap_or(Cell::Empty)
    }

    fn opt_bool(v: Option<bool>) -> Self {
        v.map(Cell::Bool).unwrap_or(Cell::Empty)
    }

    fn score(v: Option<&ScoreValue>) -> Self {
        match v {
            Some(ScoreValue::Number(n)) => Cell::Float(*n),
            Some(ScoreValue::Text(s)) => Cell::Text(s.clone()),
            None => Cell::Empty,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Bool(v) => v.to_string(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Empty => Value::Null,
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Int(v) => Value::Number((*v).into()),
            Cell::Float(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            Cell::Bool(v) => Value::Bool(*v),
        }
    }
}

struct Table {
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

fn method_row(r: &MethodRunRecord) -> Vec<Cell> {
    let perf = &r.performance;
    vec![
        Cell::text(&r.run.source_dir),
        Cell::opt_text(r.run.backend.as_deref()),
        Cell::opt_text(r.run.run_timestamp.as_deref()),
        Cell::text(&r.identity.dataset.generator),
        Cell::text(&r.identity.dataset.name),
        Cell::opt_int(r.ground_truth.true_k.map(u64::from)),
        Cell::opt_bool(r.ground_truth.has_noise),
        Cell::text(&r.identity.method),
        Cell::opt_int(r.identity.seed),
        Cell::opt_float(perf.execution_time_seconds),
        Cell::opt_float(perf.runtime),
        Cell::opt_int(perf.threads),
        Cell::opt_int(perf.disk_read),
        Cell::opt_int(perf.disk_write),
        Cell::opt_float(perf.avg_load),
        Cell::opt_int(perf.peak_rss),
    ]
}

fn method_table(records: &[MethodRunRecord]) -> Table {
    Table {
        header: METHOD_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows: records.iter().map(method_row).collect(),
    }
}

pub fn metric_score_columns(records: &[MetricRecord]) -> (Vec<u32>, Vec<String>) {
    let ks: BTreeSet<u32> = records.iter().flat_map(|r| r.scores.keys().copied()).collect();
    let extras: BTreeSet<&String> = records.iter().flat_map(|r| r.extra_columns.keys()).collect();
    (
        ks.into_iter().collect(),
        extras.into_iter().cloned().collect(),
    )
}

/// Extra columns whose name collides with an earlier column get an `extra:`
/// prefix.
pub fn metric_header(records: &[MetricRecord]) -> Vec<String> {
    let (ks, extras) = metric_score_columns(records);
    let mut header: Vec<String> = METRIC_META_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(ks.iter().map(|k| format!("k={}", k)))
        .collect();
    let mut taken: HashSet<String> = header.iter().cloned().collect();
    for extra in extras {
        let mut column = extra.clone();
        while taken.contains(&column) {
            column = format!("extra:{}", column);
        }
        if column != extra {
            warn!(
                column = %extra,
                renamed = %column,
                "score table column clashes with a metric column"
            );
        }
        taken.insert(column.clone());
        header.push(column);
    }
    header
}

fn metric_table(records: &[MetricRecord]) -> Table {
    let (ks, extras) = metric_score_columns(records);
    let rows = records
        .iter()
        .map(|r| {
            let mut row = vec![
                Cell::text(&r.run.source_dir),
                Cell::opt_text(r.run.backend.as_deref()),
                Cell::opt_text(r.run.run_timestamp.as_deref()),
                Cell::text(&r.identity.dataset.generator),
                Cell::text(&r.identity.dataset.name),
                Cell::opt_int(r.ground_truth.true_k.map(u64::from)),
                Cell::opt_bool(r.ground_truth.has_noise),
                Cell::text(&r.identity.method),
                Cell::opt_int(r.identity.seed),
                Cell::text(&r.metric),
                Cell::opt_float(r.score),
                Cell::Bool(r.duplicate_k_anomaly),
                Cell::Bool(r.empty_file),
                Cell::Bool(r.missing_true_k_score),
            ];
            row.extend(ks.iter().map(|k| Cell::score(r.scores.get(k))));
            row.extend(extras.iter().map(|c| Cell::score(r.extra_columns.get(c))));
            row
        })
        .collect();
    Table {
        header: metric_header(records),
        rows,
    }
}

pub fn output_stem(aggregation: &Aggregation) -> String {
    match aggregation.source_dirs.as_slice() {
        [dir] => match (&aggregation.backend, &aggregation.timestamp) {
            (Some(backend), Some(ts)) => {
                format!("clustbench_aggregated_{}_{}_{}", dir, backend, ts)
            }
            _ => format!("clustbench_aggregated_{}", dir),
        },
        dirs => {
            let backends = if aggregation.backends.len() <= 3 {
                aggregation.backends.join("_")
            } else {
                format!("{}_backends", aggregation.backends.len())
            };
            format!(
                "clustbench_aggregated_multi_{}_dirs_{}_{}",
                dirs.len(),
                backends,
                Utc::now().format("%Y%m%d%H%M")
            )
        }
    }
}

/// Writes `<stem>_methods`, `<stem>_metrics` in the requested formats, and
/// the duplicate-k anomaly list when it is not empty.
pub fn write_tables(
    aggregation: &Aggregation,
    out_dir: &Path,
    format: OutputFormat,
) -> Result<WrittenTables> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output dir {}", out_dir.display()))?;
    let stem = output_stem(aggregation);
    let tables = [
        ("methods", method_table(&aggregation.method_records)),
        ("metrics", metric_table(&aggregation.metric_records)),
    ];

    let mut written = WrittenTables::default();
    for (suffix, table) in &tables {
        if format.csv() {
            let path = out_dir.join(format!("{}_{}.csv", stem, suffix));
            write_csv(&path, table)?;
            written.files.push(path);
        }
        if format.json() {
            let path = out_dir.join(format!("{}_{}.jsonl", stem, suffix));
            write_jsonl(&path, table)?;
            written.files.push(path);
        }
    }
    if !aggregation.anomaly_files.is_empty() {
        let path = out_dir.join(format!("{}_duplicate_k_anomalies.txt", stem));
        write_anomaly_list(&path, &aggregation.anomaly_files)?;
        written.files.push(path);
    }
    Ok(written)
}

fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::render))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn write_jsonl(path: &Path, table: &Table) -> Result<()> {
    let file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for row in &table.rows {
        let object: Map<String, Value> = table
            .header
            .iter()
            .cloned()
            .zip(row.iter().map(Cell::to_json))
            .collect();
        serde_json::to_writer(&mut out, &Value::Object(object))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn write_anomaly_list(path: &Path, files: &[PathBuf]) -> Result<()> {
    let body: String = files
        .iter()
        .map(|f| format!("{}\n", f.display()))
        .collect();
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}
