//! Recovers (dataset, method, seed, metric) for a score file.
//!
//! Rules, in order: directory-name grammar on the ancestors of the file
//! (nearest first), then `parameters.json` sidecars within the bounded
//! sidecar depth, then the `<library>/linkage-<strategy>` compound method.
//! A field no rule resolves stays [`Resolution::Unresolved`] and becomes an
//! empty string in the records.

use crate::config::AggregatorConfig;
use crate::fsutil::{ancestors_within, dir_name, json_u64, read_json_object};
use crate::records::{DatasetIdentity, MethodRunIdentity};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::OnceLock;

const LINKAGE_PREFIX: &str = "linkage-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    DirectoryName,
    Sidecar,
    CompoundMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved { value: T, source: ResolutionSource },
    Unresolved,
}

impl<T> Resolution<T> {
    fn from_dir(value: Option<T>) -> Self {
        Self::tagged(value, ResolutionSource::DirectoryName)
    }

    fn tagged(value: Option<T>, source: ResolutionSource) -> Self {
        match value {
            Some(value) => Resolution::Resolved { value, source },
            None => Resolution::Unresolved,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Unresolved => None,
        }
    }

    pub fn source(&self) -> Option<ResolutionSource> {
        match self {
            Resolution::Resolved { source, .. } => Some(*source),
            Resolution::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn or_else(self, f: impl FnOnce() -> Resolution<T>) -> Resolution<T> {
        match self {
            Resolution::Unresolved => f(),
            resolved => resolved,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Resolution::Resolved { value, .. } => Some(value),
            Resolution::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub dataset: Resolution<DatasetIdentity>,
    pub method: Resolution<String>,
    pub seed: Resolution<u64>,
    pub metric: Resolution<String>,
}

impl ResolvedIdentity {
    /// Collapses unresolved fields to empty values.
    pub fn into_identity(self) -> (MethodRunIdentity, String) {
        let identity = MethodRunIdentity {
            dataset: self.dataset.into_option().unwrap_or_default(),
            method: self.method.into_option().unwrap_or_default(),
            seed: self.seed.into_option(),
        };
        (identity, self.metric.into_option().unwrap_or_default())
    }
}

fn dataset_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^dataset_generator-(.+)_dataset_name-(.+)$").expect("valid dataset regex")
    })
}

fn method_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^method-(.+?)(?:_seed-(\d+))?$").expect("valid method regex")
    })
}

fn linkage_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^linkage-(.+?)(?:_seed-(\d+))?$").expect("valid linkage regex")
    })
}

fn metric_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^metric-(.+)$").expect("valid metric regex"))
}

pub fn parse_dataset_dir_name(name: &str) -> Option<DatasetIdentity> {
    let caps = dataset_dir_re().captures(name)?;
    Some(DatasetIdentity::new(&caps[1], &caps[2]))
}

/// Parses `method-<name>[_seed-<n>]` into a normalized method and optional seed.
pub fn parse_method_dir_name(name: &str) -> Option<(String, Option<u64>)> {
    let caps = method_dir_re().captures(name)?;
    let method = normalize_method_token(&caps[1]);
    let seed = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
    Some((method, seed))
}

/// Parses `linkage-<strategy>[_seed-<n>]` nested under a known library.
pub fn parse_linkage_dir_name(
    library: &str,
    name: &str,
    config: &AggregatorConfig,
) -> Option<(String, Option<u64>)> {
    if !config.is_linkage_library(library) {
        return None;
    }
    let caps = linkage_dir_re().captures(name)?;
    let strategy = normalize_method_token(&caps[1]);
    let seed = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
    Some((format!("{}_{}{}", library, LINKAGE_PREFIX, strategy), seed))
}

pub fn parse_metric_dir_name(name: &str) -> Option<String> {
    metric_dir_re().captures(name).map(|caps| caps[1].to_string())
}

/// Rewrites hyphens to underscores, leaving every `linkage-` prefix intact.
pub fn normalize_method_token(token: &str) -> String {
    token
        .split(LINKAGE_PREFIX)
        .map(|part| part.replace('-', "_"))
        .collect::<Vec<_>>()
        .join(LINKAGE_PREFIX)
}

/// The `parameters.json` documents between a score file and the sidecar
/// depth bound, nearest first. Loaded once per score file.
struct SidecarChain {
    documents: Vec<Map<String, Value>>,
}

impl SidecarChain {
    fn load(score_file: &Path, config: &AggregatorConfig) -> Self {
        let documents = score_file
            .parent()
            .map(|start| {
                ancestors_within(start, config.sidecar_search_depth)
                    .filter_map(|dir| read_json_object(&dir.join(&config.parameters_file_name)))
                    .collect()
            })
            .unwrap_or_default();
        Self { documents }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.documents.iter().find_map(|doc| {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    fn seed(&self) -> Option<u64> {
        self.documents
            .iter()
            .find_map(|doc| doc.get("seed").and_then(json_u64))
    }

    fn dataset(&self) -> Option<DatasetIdentity> {
        self.documents.iter().find_map(|doc| {
            let field = |key: &str| {
                doc.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            let dataset = DatasetIdentity::new(field("dataset_generator"), field("dataset_name"));
            (!dataset.is_empty()).then_some(dataset)
        })
    }
}

pub fn resolve_identity(score_file: &Path, config: &AggregatorConfig) -> ResolvedIdentity {
    let ancestors: Vec<&Path> = score_file
        .parent()
        .map(|p| p.ancestors().collect())
        .unwrap_or_default();
    let names = || ancestors.iter().filter_map(|p| dir_name(p));
    let sidecars = SidecarChain::load(score_file, config);

    let dataset = Resolution::from_dir(names().find_map(parse_dataset_dir_name))
        .or_else(|| Resolution::tagged(sidecars.dataset(), ResolutionSource::Sidecar));

    let metric = Resolution::from_dir(names().find_map(parse_metric_dir_name))
        .or_else(|| Resolution::tagged(sidecars.string("metric"), ResolutionSource::Sidecar));

    let (method, dir_seed) = if let Some((method, seed)) = names().find_map(parse_method_dir_name)
    {
        (Resolution::from_dir(Some(method)), seed)
    } else if let Some(method) = sidecars.string("method") {
        (
            Resolution::tagged(
                Some(normalize_method_token(&method)),
                ResolutionSource::Sidecar,
            ),
            None,
        )
    } else if let Some((method, seed)) = compound_method(&ancestors, config) {
        (
            Resolution::tagged(Some(method), ResolutionSource::CompoundMethod),
            seed,
        )
    } else {
        (Resolution::Unresolved, None)
    };

    let seed_source = match method.source() {
        Some(ResolutionSource::CompoundMethod) => ResolutionSource::CompoundMethod,
        _ => ResolutionSource::DirectoryName,
    };
    let seed = Resolution::tagged(dir_seed, seed_source)
        .or_else(|| Resolution::tagged(sidecars.seed(), ResolutionSource::Sidecar));

    ResolvedIdentity {
        dataset,
        method,
        seed,
        metric,
    }
}

fn compound_method(
    ancestors: &[&Path],
    config: &AggregatorConfig,
) -> Option<(String, Option<u64>)> {
    ancestors.windows(2).find_map(|pair| {
        let name = dir_name(pair[0])?;
        let library = dir_name(pair[1])?;
        parse_linkage_dir_name(library, name, config)
    })
}
