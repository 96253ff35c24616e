//! On-disk formats shared between pipeline stages.
//!
//! Reports and statistics are pretty-printed JSON; record files are JSONL.
//! Every stage owns its output tree exclusively and downstream stages only
//! read, so these helpers never rewrite a file in place.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The frequency counter's report: the thresholded domain table plus the
/// protocol distribution and run totals. Consumed by the router as its
/// allow-set source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyReport {
    pub summary: ReportSummary,
    pub protocols: BTreeMap<String, u64>,
    /// Highest-count domains (descending), capped for readability.
    pub top_domains: Vec<DomainCount>,
    /// Full thresholded table: every domain with count >= `min_frequency`.
    pub domains: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_records: u64,
    pub valid_urls: u64,
    pub invalid_urls: u64,
    pub corrupt_rows: u64,
    pub unique_domains_total: u64,
    pub unique_domains_kept: u64,
    pub min_frequency: u64,
    /// Shards that failed wholesale; their rows contributed nothing.
    pub failed_shards: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: u64,
}

/// Per-domain sampling provenance, written next to each sample file. The
/// `files_available` vs `files_considered` gap is how consumers judge how far
/// the two-phase sample is from population-uniform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleStats {
    pub domain: String,
    pub files_available: u64,
    pub files_considered: u64,
    pub records_available: u64,
    pub records_sampled: u64,
    pub seed_used: u64,
}

pub fn save_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("decode {}", path.display()))?;
    Ok(value)
}

/// Writes one record per line. The file is created fresh; JSONL outputs are
/// never appended to across runs.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Reads a JSONL file, skipping rows that fail to decode. Returns the decoded
/// records and the skipped-row count.
pub fn read_jsonl_lossy<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, u64)> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut records = Vec::new();
    let mut corrupt = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                corrupt += 1;
                tracing::warn!(file = %path.display(), %err, "skipping corrupt row");
            }
        }
    }
    Ok((records, corrupt))
}

/// A tree of per-domain directories (bucket tree or sample tree).
pub struct DomainDirs {
    pub root: PathBuf,
}

impl DomainDirs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// The explicit manifest of domain directories, computed once and sorted.
    /// Stages iterate this list rather than re-walking the tree as they go.
    pub fn manifest(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            bail!("domain tree does not exist: {}", self.root.display());
        }
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)
            .with_context(|| format!("list {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| !n.starts_with('.'))
                        .unwrap_or(false)
            })
            .collect();
        dirs.sort();
        Ok(dirs)
    }
}

/// `<domain>_samples.jsonl` inside a per-domain sample directory.
pub fn samples_file(domain_dir: &Path, dir_name: &str) -> PathBuf {
    domain_dir.join(format!("{dir_name}_samples.jsonl"))
}

/// `<domain>_stats.json` sibling of the sample file.
pub fn sample_stats_file(domain_dir: &Path, dir_name: &str) -> PathBuf {
    domain_dir.join(format!("{dir_name}_stats.json"))
}

/// `<domain><suffix>.jsonl` merged normalizer output for one domain.
pub fn normalized_file(domain_dir: &Path, dir_name: &str, suffix: &str) -> PathBuf {
    domain_dir.join(format!("{dir_name}{suffix}.jsonl"))
}
