//! Stage 3: two-phase sampling per domain bucket.
//!
//! Phase 1 picks up to `max_files` bucket files uniformly at random; phase 2
//! draws `sample_size` records without replacement from just those files.
//! Records in unselected files have zero selection probability; the stats
//! record written per domain states the tradeoff (`files_available` vs
//! `files_considered`) so consumers can judge representativeness. Each
//! domain seeds its own generator from the base seed and the domain name, so
//! results are identical across re-runs regardless of worker scheduling.

use anyhow::{bail, Context, Result};
use clap::Args;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strata_core::persist::{
    sample_stats_file, samples_file, save_json_pretty, write_jsonl, DomainDirs, SampleStats,
};
use strata_core::rng::{stable_hash_str, SeededRng};
use strata_core::{pool, RoutedRecord};

use crate::now_rfc3339;

#[derive(Args, Debug, Clone)]
pub struct SampleArgs {
    /// Bucket tree produced by `route`
    #[arg(long)]
    pub buckets: PathBuf,
    /// Root of the sample tree to write
    #[arg(long)]
    pub output: PathBuf,
    /// Records to draw per domain
    #[arg(long, default_value_t = 100)]
    pub sample_size: usize,
    /// Upper bound on bucket files read per domain
    #[arg(long, default_value_t = 10)]
    pub max_files: usize,
    /// Base random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Worker threads; 1 forces sequential execution
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SampleSummary {
    pub generated_at: String,
    pub sample_size_requested: u64,
    pub max_files: u64,
    pub seed: u64,
    pub total_domains: u64,
    pub sampled_domains: u64,
    pub empty_domains: u64,
    pub total_records_sampled: u64,
    pub warnings: Vec<String>,
    pub results: Vec<SampleStats>,
}

pub fn run(args: &SampleArgs) -> Result<SampleSummary> {
    if args.sample_size == 0 {
        bail!("sample size must be positive");
    }
    if args.max_files == 0 {
        bail!("max files must be positive");
    }
    let manifest = DomainDirs::new(&args.buckets).manifest()?;
    if manifest.is_empty() {
        bail!("no domain buckets under {}", args.buckets.display());
    }
    fs::create_dir_all(&args.output)?;
    tracing::info!(
        num_domains = manifest.len(),
        sample_size = args.sample_size,
        max_files = args.max_files,
        seed = args.seed,
        workers = args.workers,
        "sampling domain buckets"
    );

    let output = args.output.as_path();
    let (sample_size, max_files, seed) = (args.sample_size, args.max_files, args.seed);
    let parts = pool::map_partitioned(manifest.clone(), args.workers, move |_, dirs| {
        let mut results = Vec::new();
        let mut warnings = Vec::new();
        for dir in dirs {
            match sample_domain(&dir, output, sample_size, max_files, seed) {
                Ok((stats, file_warnings)) => {
                    results.push(stats);
                    warnings.extend(file_warnings);
                }
                Err(err) => {
                    // An unreadable bucket never aborts the sweep.
                    tracing::warn!(bucket = %dir.display(), %err, "bucket skipped");
                    warnings.push(format!("{}: {err:#}", dir.display()));
                }
            }
        }
        (results, warnings)
    });

    let mut summary = SampleSummary {
        generated_at: now_rfc3339(),
        sample_size_requested: args.sample_size as u64,
        max_files: args.max_files as u64,
        seed: args.seed,
        total_domains: manifest.len() as u64,
        sampled_domains: 0,
        empty_domains: 0,
        total_records_sampled: 0,
        warnings: Vec::new(),
        results: Vec::new(),
    };
    for (results, warnings) in parts {
        summary.warnings.extend(warnings);
        summary.results.extend(results);
    }
    // Deterministic summary ordering regardless of worker scheduling.
    summary.results.sort_by(|a, b| a.domain.cmp(&b.domain));
    summary.warnings.sort();
    for stats in &summary.results {
        summary.total_records_sampled += stats.records_sampled;
        if stats.records_sampled == 0 {
            summary.empty_domains += 1;
        } else {
            summary.sampled_domains += 1;
        }
    }

    save_json_pretty(&args.output.join("sampling_summary.json"), &summary)?;
    tracing::info!(
        total_domains = summary.total_domains,
        sampled_domains = summary.sampled_domains,
        empty_domains = summary.empty_domains,
        total_records_sampled = summary.total_records_sampled,
        warnings = summary.warnings.len(),
        "sampling complete"
    );
    Ok(summary)
}

fn sample_domain(
    bucket_dir: &Path,
    output: &Path,
    sample_size: usize,
    max_files: usize,
    seed: u64,
) -> Result<(SampleStats, Vec<String>)> {
    let dir_name = bucket_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("bad bucket name {}", bucket_dir.display()))?;

    // Sorted listing so file selection depends only on bucket contents, not
    // on directory-iteration order.
    let mut files: Vec<PathBuf> = fs::read_dir(bucket_dir)
        .with_context(|| format!("list {}", bucket_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("jsonl")
        })
        .collect();
    files.sort();

    let seed_used = stable_hash_str(seed, &dir_name);
    let mut rng = SeededRng::new(seed_used);

    // Phase 1: bounded file selection.
    let considered = max_files.min(files.len());
    let (chosen, _) = files.partial_shuffle(&mut rng, considered);
    let chosen: Vec<PathBuf> = chosen.to_vec();

    // Phase 2: draw from the chosen files only.
    let mut records: Vec<RoutedRecord> = Vec::new();
    let mut warnings = Vec::new();
    for file in &chosen {
        match strata_core::persist::read_jsonl_lossy::<RoutedRecord>(file) {
            Ok((recs, _corrupt)) => records.extend(recs),
            Err(err) => {
                // File contributes zero; its siblings still count.
                tracing::warn!(file = %file.display(), %err, "bucket file unreadable");
                warnings.push(format!("{}: {err:#}", file.display()));
            }
        }
    }
    let records_available = records.len();
    let take = sample_size.min(records_available);
    let (sampled, _) = records.partial_shuffle(&mut rng, take);

    let domain_out = output.join(&dir_name);
    write_jsonl(&samples_file(&domain_out, &dir_name), &sampled[..take])?;

    let stats = SampleStats {
        domain: dir_name.clone(),
        files_available: files.len() as u64,
        files_considered: considered as u64,
        records_available: records_available as u64,
        records_sampled: take as u64,
        seed_used,
    };
    save_json_pretty(&sample_stats_file(&domain_out, &dir_name), &stats)?;

    if take < sample_size {
        tracing::warn!(
            domain = %dir_name,
            records_available,
            requested = sample_size,
            "sample shortfall"
        );
    }
    Ok((stats, warnings))
}
