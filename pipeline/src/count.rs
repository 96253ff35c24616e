//! Stage 1: streaming domain-frequency counting.
//!
//! Shard files are partitioned across a worker pool; each worker streams its
//! shards in bounded chunks and accumulates a private tally. Tallies are
//! reduced key-wise after the join barrier (the reduction is commutative, so
//! worker completion order never changes the result), then the domain table
//! is thresholded to bound the report size.

use anyhow::{bail, Result};
use clap::Args;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use strata_core::persist::{
    save_json_pretty, DomainCount, FrequencyReport, ReportSummary,
};
use strata_core::{domain, pool, shard};

/// Number of entries in the report's `top_domains` convenience listing.
const TOP_DOMAINS: usize = 100;

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    /// Directory containing input shard files
    #[arg(long)]
    pub shards: PathBuf,
    /// Output report path
    #[arg(long, default_value = "url_stats.json")]
    pub output: PathBuf,
    /// Drop domains seen fewer than this many times
    #[arg(long, default_value_t = 2)]
    pub min_freq: u64,
    /// Rows decoded per chunk while streaming a shard
    #[arg(long, default_value_t = 10_000)]
    pub chunk_size: usize,
    /// Worker threads; 1 forces sequential execution
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
}

/// One worker's private counts, merged key-wise by the coordinator.
#[derive(Debug, Default)]
struct Tally {
    domains: HashMap<String, u64>,
    protocols: HashMap<String, u64>,
    total_records: u64,
    valid_urls: u64,
    invalid_urls: u64,
    corrupt_rows: u64,
    failed_shards: Vec<String>,
}

impl Tally {
    fn absorb(&mut self, other: Tally) {
        for (key, count) in other.domains {
            *self.domains.entry(key).or_insert(0) += count;
        }
        for (key, count) in other.protocols {
            *self.protocols.entry(key).or_insert(0) += count;
        }
        self.total_records += other.total_records;
        self.valid_urls += other.valid_urls;
        self.invalid_urls += other.invalid_urls;
        self.corrupt_rows += other.corrupt_rows;
        self.failed_shards.extend(other.failed_shards);
    }
}

pub fn run(args: &CountArgs) -> Result<FrequencyReport> {
    if args.chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    let shards = shard::list_shards(&args.shards)?;
    if shards.is_empty() {
        bail!("no shard files under {}", args.shards.display());
    }
    tracing::info!(
        num_shards = shards.len(),
        workers = args.workers,
        chunk_size = args.chunk_size,
        "counting domain frequencies"
    );

    let chunk_size = args.chunk_size;
    let parts = pool::map_partitioned(shards, args.workers, |worker, paths| {
        tally_shards(worker, &paths, chunk_size)
    });
    let mut merged = Tally::default();
    for part in parts {
        merged.absorb(part);
    }
    merged.failed_shards.sort();

    let report = build_report(merged, args.min_freq);
    save_json_pretty(&args.output, &report)?;

    let summary = &report.summary;
    tracing::info!(
        total_records = summary.total_records,
        valid_urls = summary.valid_urls,
        invalid_urls = summary.invalid_urls,
        corrupt_rows = summary.corrupt_rows,
        unique_domains_total = summary.unique_domains_total,
        unique_domains_kept = summary.unique_domains_kept,
        failed_shards = summary.failed_shards.len(),
        output = %args.output.display(),
        "frequency report written"
    );
    Ok(report)
}

fn tally_shards(worker: usize, paths: &[PathBuf], chunk_size: usize) -> Tally {
    let mut tally = Tally::default();
    for path in paths {
        if let Err(err) = tally_one_shard(&mut tally, path, chunk_size) {
            // A fatal read error aborts this shard only; siblings continue.
            tracing::warn!(worker, shard = %path.display(), %err, "shard failed");
            tally.failed_shards.push(path.display().to_string());
        }
    }
    tracing::info!(
        worker,
        shards = paths.len(),
        records = tally.total_records,
        valid = tally.valid_urls,
        "worker tally complete"
    );
    tally
}

fn tally_one_shard(tally: &mut Tally, path: &Path, chunk_size: usize) -> Result<()> {
    let mut chunks = shard::ShardChunks::open(path, chunk_size)?;
    while let Some(records) = chunks.next_chunk()? {
        for record in records {
            tally.total_records += 1;
            match domain::split_url(&record.url) {
                Some((scheme, key)) => {
                    tally.valid_urls += 1;
                    *tally.protocols.entry(scheme).or_insert(0) += 1;
                    *tally.domains.entry(key).or_insert(0) += 1;
                }
                None => tally.invalid_urls += 1,
            }
        }
    }
    // Corrupt rows still count toward the rows seen in this shard.
    tally.total_records += chunks.corrupt_rows();
    tally.corrupt_rows += chunks.corrupt_rows();
    Ok(())
}

fn build_report(merged: Tally, min_freq: u64) -> FrequencyReport {
    let unique_total = merged.domains.len() as u64;
    let kept: std::collections::BTreeMap<String, u64> = merged
        .domains
        .into_iter()
        .filter(|(_, count)| *count >= min_freq)
        .collect();

    let mut top: Vec<DomainCount> = kept
        .iter()
        .map(|(domain, count)| DomainCount { domain: domain.clone(), count: *count })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
    top.truncate(TOP_DOMAINS);

    FrequencyReport {
        summary: ReportSummary {
            total_records: merged.total_records,
            valid_urls: merged.valid_urls,
            invalid_urls: merged.invalid_urls,
            corrupt_rows: merged.corrupt_rows,
            unique_domains_total: unique_total,
            unique_domains_kept: kept.len() as u64,
            min_frequency: min_freq,
            failed_shards: merged.failed_shards,
        },
        protocols: merged.protocols.into_iter().collect(),
        top_domains: top,
        domains: kept,
    }
}
