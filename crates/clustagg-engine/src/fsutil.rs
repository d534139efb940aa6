use flate2::read::MultiGzDecoder;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tracing::warn;

pub(crate) fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|s| s.to_str())
}

/// `start` and at most `depth - 1` of its parents, nearest first.
pub(crate) fn ancestors_within(start: &Path, depth: usize) -> impl Iterator<Item = &Path> {
    start.ancestors().take(depth)
}

/// Reads a JSON object sidecar. Missing files are `None` silently; malformed
/// ones are `None` with a warning.
pub(crate) fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable sidecar");
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!(path = %path.display(), "sidecar is not a JSON object");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed sidecar");
            None
        }
    }
}

pub(crate) fn read_gz_to_string(bytes: &[u8]) -> io::Result<String> {
    let mut out = String::new();
    MultiGzDecoder::new(bytes).read_to_string(&mut out)?;
    Ok(out)
}

/// Integer view of a JSON value; integral floats and numeric strings count.
pub(crate) fn json_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub(crate) fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_u64_accepts_integral_floats_and_strings() {
        assert_eq!(json_u64(&json!(4)), Some(4));
        assert_eq!(json_u64(&json!(2048.0)), Some(2048));
        assert_eq!(json_u64(&json!("17")), Some(17));
        assert_eq!(json_u64(&json!(2.5)), None);
        assert_eq!(json_u64(&json!(-1)), None);
        assert_eq!(json_u64(&json!(null)), None);
    }

    #[test]
    fn ancestors_within_is_bounded() {
        let p = Path::new("/a/b/c/d");
        let seen: Vec<&Path> = ancestors_within(p, 2).collect();
        assert_eq!(seen, vec![Path::new("/a/b/c/d"), Path::new("/a/b/c")]);
    }
}
