//! Stage 2: domain-keyed partitioning of the corpus.
//!
//! Same fan-out shape as the counter, but workers buffer accepted records per
//! domain and flush them to private `.jsonl.tmp` files, so no two workers
//! ever share a destination file. A single-threaded merge step then promotes
//! the temp files to canonical `part-NNNNN.jsonl` names in sorted order;
//! bucket contents are a multiset, so the promotion order only matters for
//! reproducible file naming.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use strata_core::persist::{load_json, save_json_pretty, write_jsonl, FrequencyReport};
use strata_core::{domain, pool, shard, RoutedRecord};

use crate::now_rfc3339;

const TMP_SUFFIX: &str = ".jsonl.tmp";

#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    /// Directory containing input shard files
    #[arg(long)]
    pub shards: PathBuf,
    /// Frequency report produced by `count`
    #[arg(long)]
    pub report: PathBuf,
    /// Root of the domain bucket tree to write
    #[arg(long)]
    pub output: PathBuf,
    /// Route only domains the report counts at least this often
    #[arg(long, default_value_t = 100)]
    pub min_freq: u64,
    /// Rows decoded per chunk while streaming a shard
    #[arg(long, default_value_t = 50_000)]
    pub chunk_size: usize,
    /// Records buffered per domain before flushing to a private file
    #[arg(long, default_value_t = 5_000)]
    pub flush_threshold: usize,
    /// Worker threads; 1 forces sequential execution
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
    /// Delete and rebuild buckets that already exist (default: skip them)
    #[arg(long, default_value_t = false)]
    pub cleanup: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteSummary {
    pub generated_at: String,
    pub min_frequency: u64,
    pub total_records: u64,
    pub records_routed: u64,
    pub records_dropped: u64,
    pub corrupt_rows: u64,
    pub write_errors: u64,
    pub failed_shards: Vec<String>,
    /// Buckets left untouched because they were already fully merged.
    pub skipped_domains: Vec<String>,
    /// Records routed per domain in this run.
    pub domains: BTreeMap<String, u64>,
}

/// One worker's private routing counters.
#[derive(Debug, Default)]
struct RoutePart {
    processed: u64,
    routed: u64,
    dropped: u64,
    corrupt: u64,
    write_errors: u64,
    failed_shards: Vec<String>,
    domain_counts: HashMap<String, u64>,
}

pub fn run(args: &RouteArgs) -> Result<RouteSummary> {
    if args.chunk_size == 0 || args.flush_threshold == 0 {
        bail!("chunk size and flush threshold must be positive");
    }
    let shards = shard::list_shards(&args.shards)?;
    if shards.is_empty() {
        bail!("no shard files under {}", args.shards.display());
    }
    let report: FrequencyReport = load_json(&args.report)?;

    // Allow-set: report domains at or above this stage's own threshold,
    // mapped to their on-disk directory names.
    let mut allow: HashMap<String, String> = report
        .domains
        .iter()
        .filter(|(_, count)| **count >= args.min_freq)
        .map(|(key, _)| (key.clone(), domain::dir_name(key)))
        .collect();
    if allow.is_empty() {
        bail!(
            "no domains in {} reach min frequency {}",
            args.report.display(),
            args.min_freq
        );
    }
    fs::create_dir_all(&args.output)?;

    let skipped = prepare_buckets(&args.output, &mut allow, args.cleanup)?;
    tracing::info!(
        num_shards = shards.len(),
        allowed_domains = allow.len(),
        skipped_domains = skipped.len(),
        cleanup = args.cleanup,
        "routing records into domain buckets"
    );

    let mut summary = RouteSummary {
        generated_at: now_rfc3339(),
        min_frequency: args.min_freq,
        total_records: 0,
        records_routed: 0,
        records_dropped: 0,
        corrupt_rows: 0,
        write_errors: 0,
        failed_shards: Vec::new(),
        skipped_domains: skipped,
        domains: BTreeMap::new(),
    };

    if !allow.is_empty() {
        let allow = &allow;
        let output = args.output.as_path();
        let (chunk_size, flush_threshold) = (args.chunk_size, args.flush_threshold);
        let parts = pool::map_partitioned(shards, args.workers, move |worker, paths| {
            route_shards(worker, &paths, allow, output, chunk_size, flush_threshold)
        });
        for part in parts {
            summary.total_records += part.processed;
            summary.records_routed += part.routed;
            summary.records_dropped += part.dropped;
            summary.corrupt_rows += part.corrupt;
            summary.write_errors += part.write_errors;
            summary.failed_shards.extend(part.failed_shards);
            for (key, count) in part.domain_counts {
                *summary.domains.entry(key).or_insert(0) += count;
            }
        }
        summary.failed_shards.sort();
        merge_buckets(&args.output, allow)?;
    }

    save_json_pretty(&args.output.join("routing_summary.json"), &summary)?;
    tracing::info!(
        total_records = summary.total_records,
        records_routed = summary.records_routed,
        records_dropped = summary.records_dropped,
        corrupt_rows = summary.corrupt_rows,
        write_errors = summary.write_errors,
        failed_shards = summary.failed_shards.len(),
        "routing complete"
    );
    Ok(summary)
}

/// Applies the run mode to pre-existing buckets before any worker is spawned.
/// Returns the domains dropped from the allow-set under preserve mode.
fn prepare_buckets(
    output: &Path,
    allow: &mut HashMap<String, String>,
    cleanup: bool,
) -> Result<Vec<String>> {
    let mut skipped = Vec::new();
    let mut drop_keys = Vec::new();
    for (key, dir_name) in allow.iter() {
        let dir = output.join(dir_name);
        if !dir.exists() {
            continue;
        }
        if !cleanup && is_merged_bucket(&dir)? {
            skipped.push(key.clone());
            drop_keys.push(key.clone());
            continue;
        }
        // Cleanup mode, or a partial run left temp files behind: rebuild.
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    for key in drop_keys {
        allow.remove(&key);
    }
    skipped.sort();
    Ok(skipped)
}

/// A bucket is fully merged when it holds canonical part files and no
/// leftover worker temp files.
fn is_merged_bucket(dir: &Path) -> Result<bool> {
    let mut has_part = false;
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(TMP_SUFFIX) {
            return Ok(false);
        }
        if name.starts_with("part-") && name.ends_with(".jsonl") {
            has_part = true;
        }
    }
    Ok(has_part)
}

fn route_shards(
    worker: usize,
    paths: &[PathBuf],
    allow: &HashMap<String, String>,
    output: &Path,
    chunk_size: usize,
    flush_threshold: usize,
) -> RoutePart {
    let mut part = RoutePart::default();
    let mut buffers: HashMap<String, Vec<RoutedRecord>> = HashMap::new();
    let mut flush_seq: HashMap<String, u64> = HashMap::new();

    for path in paths {
        if let Err(err) = route_one_shard(
            &mut part,
            &mut buffers,
            &mut flush_seq,
            worker,
            path,
            allow,
            output,
            chunk_size,
            flush_threshold,
        ) {
            tracing::warn!(worker, shard = %path.display(), %err, "shard failed");
            part.failed_shards.push(path.display().to_string());
        }
    }
    // Drain whatever is still buffered.
    for (dir_name, records) in buffers {
        if !records.is_empty() {
            flush(&mut part, &mut flush_seq, worker, output, &dir_name, &records);
        }
    }
    tracing::info!(
        worker,
        shards = paths.len(),
        processed = part.processed,
        routed = part.routed,
        "worker routing complete"
    );
    part
}

#[allow(clippy::too_many_arguments)]
fn route_one_shard(
    part: &mut RoutePart,
    buffers: &mut HashMap<String, Vec<RoutedRecord>>,
    flush_seq: &mut HashMap<String, u64>,
    worker: usize,
    path: &Path,
    allow: &HashMap<String, String>,
    output: &Path,
    chunk_size: usize,
    flush_threshold: usize,
) -> Result<()> {
    let file_source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut chunks = shard::ShardChunks::open(path, chunk_size)?;
    while let Some(records) = chunks.next_chunk()? {
        for record in records {
            part.processed += 1;
            let key = match domain::domain_key(&record.url) {
                Some(key) => key,
                None => {
                    part.dropped += 1;
                    continue;
                }
            };
            let dir_name = match allow.get(&key) {
                Some(dir_name) => dir_name,
                None => {
                    // Long-tail domains are dropped, not buffered.
                    part.dropped += 1;
                    continue;
                }
            };
            part.routed += 1;
            *part.domain_counts.entry(key.clone()).or_insert(0) += 1;
            let buffer = buffers.entry(dir_name.clone()).or_default();
            buffer.push(RoutedRecord {
                url: record.url,
                domain: key,
                file_source: file_source.clone(),
                content: record.content,
                extra: record.extra,
            });
            if buffer.len() >= flush_threshold {
                let full = std::mem::take(buffer);
                flush(part, flush_seq, worker, output, dir_name, &full);
            }
        }
    }
    part.processed += chunks.corrupt_rows();
    part.corrupt += chunks.corrupt_rows();
    Ok(())
}

/// Writes one private temp file for this worker and domain. A failed flush is
/// counted and surfaced in the summary; routing of other domains continues.
fn flush(
    part: &mut RoutePart,
    flush_seq: &mut HashMap<String, u64>,
    worker: usize,
    output: &Path,
    dir_name: &str,
    records: &[RoutedRecord],
) {
    let seq = flush_seq.entry(dir_name.to_string()).or_insert(0);
    let file = output
        .join(dir_name)
        .join(format!("w{worker:02}-{seq:05}{TMP_SUFFIX}"));
    *seq += 1;
    if let Err(err) = write_jsonl(&file, records) {
        part.write_errors += 1;
        tracing::warn!(worker, file = %file.display(), %err, "flush failed");
    }
}

/// Single-threaded merge: promotes every worker temp file to a canonical
/// part name. Runs strictly after the pool-join barrier, so no file is ever
/// shared with a concurrent writer.
fn merge_buckets(output: &Path, allow: &HashMap<String, String>) -> Result<()> {
    let mut dir_names: Vec<&String> = allow.values().collect();
    dir_names.sort();
    dir_names.dedup();
    for dir_name in dir_names {
        let dir = output.join(dir_name);
        if !dir.exists() {
            tracing::warn!(domain_dir = %dir.display(), "no records routed for allowed domain");
            continue;
        }
        let mut tmp_files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("list {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(TMP_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        tmp_files.sort();
        for (idx, tmp) in tmp_files.iter().enumerate() {
            let canonical = dir.join(format!("part-{idx:05}.jsonl"));
            fs::rename(tmp, &canonical)
                .with_context(|| format!("promote {}", tmp.display()))?;
        }
    }
    Ok(())
}
