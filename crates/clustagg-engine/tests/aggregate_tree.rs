use chrono::Utc;
use clustagg_engine::{
    aggregate_roots, write_tables, AggregatorConfig, Aggregation, DatasetIdentity,
    MethodRunIdentity, OutputFormat, RunTag,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static SEQ: AtomicUsize = AtomicUsize::new(0);

struct TempTree {
    root: PathBuf,
}

impl TempTree {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "clustagg_it_{}_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).expect("temp root");
        Self { root }
    }
}

impl Drop for TempTree {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn write_gz(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let file = fs::File::create(path).expect("create");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(content.as_bytes()).expect("write");
    encoder.finish().expect("finish");
}

const DATASETS: [(&str, &str, &[i64]); 3] = [
    ("fcps", "atom", &[1, 1, 2, 2, 1, 2]),
    ("fcps", "lsun", &[1, 2, 3, 3, 2, 1]),
    ("wut", "x2", &[0, 1, 1, 2, 2, 0]),
];
const METHODS: [&str; 3] = [
    "method-kmeans_seed-1",
    "method-kmeans_seed-2",
    "fastcluster/linkage-ward",
];
const METRICS: [&str; 3] = ["ari", "ami", "nmi"];

/// Three datasets, three method runs and three metrics per run directory.
fn build_run(run: &Path) {
    for (generator, name, labels) in DATASETS {
        let dataset_dir = run
            .join("data/clustbench")
            .join(format!("dataset_generator-{}_dataset_name-{}", generator, name));
        let body: String = labels.iter().map(|l| format!("{}\n", l)).collect();
        write_gz(&dataset_dir.join("clustbench.labels0.gz"), &body);
        for method in METHODS {
            let method_dir = dataset_dir.join("clustering").join(method);
            fs::create_dir_all(&method_dir).expect("method dir");
            fs::write(
                method_dir.join("perf.json"),
                r#"{"total_time_secs": 12.5, "max_threads": 4, "peak_mem_rss_kb": 2048}"#,
            )
            .expect("perf");
            for metric in METRICS {
                write_gz(
                    &method_dir
                        .join("metrics/partition_metrics")
                        .join(format!("metric-{}", metric))
                        .join("clustbench.scores.gz"),
                    "k=1,k=2,k=3,k=4\n0.1,0.8,0.7,0.6\n",
                );
            }
        }
    }
}

fn two_run_tree(tag: &str) -> (TempTree, PathBuf, PathBuf, PathBuf) {
    let tree = TempTree::new(tag);
    let bench = tree.root.join("bench");
    let conda = bench.join("out_conda-202506231301");
    let apptainer = bench.join("out-apptainer_202505301205");
    build_run(&conda);
    build_run(&apptainer);
    fs::create_dir_all(bench.join("notes")).expect("notes");
    (tree, bench, conda, apptainer)
}

fn sequential() -> AggregatorConfig {
    AggregatorConfig::default().with_workers(1)
}

#[test]
fn one_method_record_per_method_run_and_one_metric_record_per_file() {
    let (_tree, bench, _, _) = two_run_tree("counts");
    let agg = aggregate_roots(&[bench], &sequential()).expect("aggregate");

    assert_eq!(agg.summary.run_directories, 2);
    assert_eq!(agg.summary.score_files, 54);
    assert_eq!(agg.metric_records.len(), 54);
    assert_eq!(agg.method_records.len(), 18);
    assert_eq!(agg.summary.failed_files, 0);
    assert_eq!(agg.distinct_datasets(), 3);
    assert_eq!(agg.distinct_methods(), 2);
    assert_eq!(agg.distinct_metrics(), 3);

    let keys: HashSet<(RunTag, MethodRunIdentity)> =
        agg.method_records.iter().map(|r| r.dedup_key()).collect();
    assert_eq!(keys.len(), agg.method_records.len());
}

#[test]
fn both_run_directory_naming_variants_are_recognized() {
    let (_tree, bench, _, _) = two_run_tree("naming");
    let agg = aggregate_roots(&[bench], &sequential()).expect("aggregate");

    let runs: HashSet<(Option<String>, Option<String>)> = agg
        .method_records
        .iter()
        .map(|r| (r.run.backend.clone(), r.run.run_timestamp.clone()))
        .collect();
    assert!(runs.contains(&(Some("conda".to_string()), Some("202506231301".to_string()))));
    assert!(runs.contains(&(Some("apptainer".to_string()), Some("202505301205".to_string()))));
    assert_eq!(runs.len(), 2);
    assert_eq!(agg.backend, None);
    assert_eq!(agg.source_dirs, vec!["bench".to_string()]);
}

#[test]
fn metric_and_method_streams_agree() {
    let (_tree, bench, _, _) = two_run_tree("consistency");
    let agg = aggregate_roots(&[bench], &sequential()).expect("aggregate");

    let method_keys: HashSet<(RunTag, MethodRunIdentity)> =
        agg.method_records.iter().map(|r| r.dedup_key()).collect();
    let metric_keys: HashSet<(RunTag, MethodRunIdentity)> = agg
        .metric_records
        .iter()
        .map(|r| (r.run.clone(), r.identity.clone()))
        .collect();
    assert_eq!(method_keys, metric_keys);

    for metric in &agg.metric_records {
        let method = agg
            .method_records
            .iter()
            .find(|m| m.run == metric.run && m.identity == metric.identity)
            .expect("matching method record");
        assert_eq!(method.ground_truth, metric.ground_truth);
    }
}

#[test]
fn ground_truth_and_scores_follow_the_labels() {
    let (_tree, _bench, conda, _) = two_run_tree("truth");
    let agg = aggregate_roots(&[conda], &sequential()).expect("aggregate");

    let lookup = |generator: &str, name: &str| {
        agg.metric_records
            .iter()
            .find(|r| {
                r.identity.dataset == DatasetIdentity::new(generator, name) && r.metric == "ari"
            })
            .expect("record")
    };
    let atom = lookup("fcps", "atom");
    assert_eq!(atom.ground_truth.true_k, Some(2));
    assert_eq!(atom.ground_truth.has_noise, Some(false));
    assert_eq!(atom.score, Some(0.8));

    let lsun = lookup("fcps", "lsun");
    assert_eq!(lsun.ground_truth.true_k, Some(3));
    assert_eq!(lsun.score, Some(0.7));

    let x2 = lookup("wut", "x2");
    assert_eq!(x2.ground_truth.true_k, Some(2));
    assert_eq!(x2.ground_truth.has_noise, Some(true));
    assert!(!x2.missing_true_k_score);

    let methods: HashSet<(&str, Option<u64>)> = agg
        .method_records
        .iter()
        .map(|r| (r.identity.method.as_str(), r.identity.seed))
        .collect();
    assert_eq!(
        methods,
        HashSet::from([
            ("kmeans", Some(1)),
            ("kmeans", Some(2)),
            ("fastcluster_linkage-ward", None),
        ])
    );
    assert!(agg
        .method_records
        .iter()
        .all(|r| r.performance.runtime == Some(12.5) && r.performance.threads == Some(4)));
}

#[test]
fn anomalies_and_empty_files_are_counted() {
    let (_tree, _bench, conda, _) = two_run_tree("anomalies");
    let method_dir = conda
        .join("data/clustbench/dataset_generator-fcps_dataset_name-atom")
        .join("clustering/method-kmeans_seed-1");
    let anomalous = method_dir.join("metrics/partition_metrics/metric-ari/clustbench.scores.gz");
    write_gz(&anomalous, "k=2,k=3,k=3\n0.8,0.9,0.5\n");
    write_gz(
        &method_dir.join("metrics/partition_metrics/metric-ami/clustbench.scores.gz"),
        "",
    );
    write_gz(
        &method_dir.join("metrics/partition_metrics/metric-nmi/clustbench.scores.gz"),
        "k=3,k=4\n0.7,0.6\n",
    );

    let agg = aggregate_roots(&[conda], &sequential()).expect("aggregate");
    assert_eq!(agg.summary.duplicate_k_anomalies, 1);
    assert_eq!(agg.anomaly_files, vec![anomalous]);
    assert_eq!(agg.summary.empty_files, 1);
    assert_eq!(agg.summary.missing_true_k_scores, 1);
    assert_eq!(agg.metric_records.len(), 27);
    assert_eq!(agg.method_records.len(), 9);
}

#[test]
fn aggregation_is_idempotent() {
    let (tree, bench, _, _) = two_run_tree("idempotent");
    let config = sequential();
    let first = aggregate_roots(&[bench.clone()], &config).expect("first");
    let second = aggregate_roots(&[bench], &config).expect("second");
    assert_eq!(first.method_records, second.method_records);
    assert_eq!(first.metric_records, second.metric_records);

    let out_a = tree.root.join("out_a");
    let out_b = tree.root.join("out_b");
    let written_a = write_tables(&first, &out_a, OutputFormat::Both).expect("write a");
    let written_b = write_tables(&second, &out_b, OutputFormat::Both).expect("write b");
    assert_eq!(written_a.files.len(), 4);
    for (a, b) in written_a.files.iter().zip(&written_b.files) {
        assert_eq!(a.file_name(), b.file_name());
        assert_eq!(
            fs::read_to_string(a).expect("read a"),
            fs::read_to_string(b).expect("read b")
        );
    }
    assert!(out_a.join("clustbench_aggregated_bench_metrics.csv").is_file());
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let (_tree, _bench, conda, apptainer) = two_run_tree("parallel");
    let roots = vec![conda, apptainer];
    let seq: Aggregation = aggregate_roots(&roots, &sequential()).expect("sequential");
    let par: Aggregation =
        aggregate_roots(&roots, &AggregatorConfig::default().with_workers(4)).expect("parallel");

    assert_eq!(seq.method_records, par.method_records);
    assert_eq!(seq.metric_records, par.metric_records);
    assert_eq!(seq.summary, par.summary);
    assert_eq!(seq.backends, par.backends);
    assert_eq!(
        seq.source_dirs,
        vec!["out_conda-202506231301".to_string(), "out-apptainer_202505301205".to_string()]
    );
    assert_eq!(seq.backends, vec!["conda".to_string(), "apptainer".to_string()]);
}
