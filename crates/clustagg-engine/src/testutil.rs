use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "clustagg_{}_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros(),
            SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).expect("scratch dir");
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let dir = self.root.join(rel);
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

pub fn write_gz(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
    let file = fs::File::create(path).expect("create gz");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(content.as_bytes()).expect("write gz");
    encoder.finish().expect("finish gz");
}

pub fn write_labels(path: &Path, labels: &[i64]) {
    let body: String = labels.iter().map(|l| format!("{}\n", l)).collect();
    write_gz(path, &body);
}

pub fn write_scores(path: &Path, header: &[&str], data: &[&str]) {
    write_gz(path, &format!("{}\n{}\n", header.join(","), data.join(",")));
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
    fs::write(path, content).expect("write file");
}

pub const LEGACY_PERF_HEADER: &str =
    "s\tusr\tsys\tmaxrss\tixrss\tidrss\tisrss\tminflt\tmajflt\tnswap\tinblock\toublock\tmsgsnd\tmsgrcv\tnsignals\tnvcsw\tnivcsw";
