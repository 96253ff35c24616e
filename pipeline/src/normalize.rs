//! Stage 4: best-effort content normalization of sampled records.
//!
//! Every sampled record is converted to extracted text and tagged with the
//! outcome: `markdown` when structured extraction produced something,
//! `raw` when there was nothing to extract (the content passes through
//! untouched), `error` when the extractor blew up (the content is preserved
//! so no data is lost). Per-domain results are merged into one output file
//! per domain, named by the configured suffix. Cleanup mode deletes prior
//! outputs and rebuilds everything; preserve mode skips domains whose merged
//! output already exists.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use strata_core::extract::extract_markdown;
use strata_core::persist::{
    normalized_file, read_jsonl_lossy, save_json_pretty, write_jsonl, DomainDirs,
};
use strata_core::{pool, FormatTag, NormalizedRecord, RoutedRecord};

use crate::now_rfc3339;

#[derive(Args, Debug, Clone)]
pub struct NormalizeArgs {
    /// Sample tree produced by `sample`
    #[arg(long)]
    pub samples: PathBuf,
    /// Suffix naming the merged normalized output files
    #[arg(long, default_value = "_markdown")]
    pub output_suffix: String,
    /// Worker threads; 1 forces sequential execution
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
    /// Delete prior normalized output and reprocess every domain
    #[arg(long, default_value_t = false)]
    pub cleanup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainNormalizeStats {
    pub domain: String,
    pub source_files: u64,
    pub total_records: u64,
    pub markdown: u64,
    pub raw: u64,
    pub error: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NormalizeSummary {
    pub generated_at: String,
    pub output_suffix: String,
    pub cleanup: bool,
    pub deleted_outputs: u64,
    pub total_domains: u64,
    pub processed_domains: u64,
    /// Domains left untouched in preserve mode because output already exists.
    pub skipped_domains: Vec<String>,
    pub failed_domains: Vec<String>,
    pub total_records: u64,
    pub markdown: u64,
    pub raw: u64,
    pub error: u64,
    pub results: Vec<DomainNormalizeStats>,
}

pub fn run(args: &NormalizeArgs) -> Result<NormalizeSummary> {
    if args.output_suffix.is_empty() {
        bail!("output suffix must not be empty");
    }
    let manifest = DomainDirs::new(&args.samples).manifest()?;
    if manifest.is_empty() {
        bail!("no domain directories under {}", args.samples.display());
    }

    let mut summary = NormalizeSummary {
        generated_at: now_rfc3339(),
        output_suffix: args.output_suffix.clone(),
        cleanup: args.cleanup,
        deleted_outputs: 0,
        total_domains: manifest.len() as u64,
        processed_domains: 0,
        skipped_domains: Vec::new(),
        failed_domains: Vec::new(),
        total_records: 0,
        markdown: 0,
        raw: 0,
        error: 0,
        results: Vec::new(),
    };

    if args.cleanup {
        summary.deleted_outputs = delete_prior_outputs(&manifest, &args.output_suffix)?;
        tracing::info!(deleted = summary.deleted_outputs, "cleared prior normalized output");
    }

    // Preserve mode drops already-complete domains before any worker starts.
    let mut work: Vec<(PathBuf, String)> = Vec::new();
    for dir in manifest {
        let dir_name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !args.cleanup && normalized_file(&dir, &dir_name, &args.output_suffix).exists() {
            summary.skipped_domains.push(dir_name);
            continue;
        }
        work.push((dir, dir_name));
    }
    tracing::info!(
        to_process = work.len(),
        skipped = summary.skipped_domains.len(),
        cleanup = args.cleanup,
        workers = args.workers,
        "normalizing sampled content"
    );

    let suffix = args.output_suffix.as_str();
    let parts = pool::map_partitioned(work, args.workers, move |_, items| {
        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (dir, dir_name) in items {
            match normalize_domain(&dir, &dir_name, suffix) {
                Ok(stats) => results.push(stats),
                Err(err) => {
                    tracing::warn!(domain = %dir_name, %err, "domain failed");
                    failures.push(dir_name);
                }
            }
        }
        (results, failures)
    });
    for (results, failures) in parts {
        summary.failed_domains.extend(failures);
        summary.results.extend(results);
    }
    summary.results.sort_by(|a, b| a.domain.cmp(&b.domain));
    summary.failed_domains.sort();
    for stats in &summary.results {
        summary.processed_domains += 1;
        summary.total_records += stats.total_records;
        summary.markdown += stats.markdown;
        summary.raw += stats.raw;
        summary.error += stats.error;
    }

    save_json_pretty(&args.samples.join("normalization_summary.json"), &summary)?;
    tracing::info!(
        processed = summary.processed_domains,
        skipped = summary.skipped_domains.len(),
        failed = summary.failed_domains.len(),
        total_records = summary.total_records,
        markdown = summary.markdown,
        raw = summary.raw,
        error = summary.error,
        "normalization complete"
    );
    Ok(summary)
}

fn delete_prior_outputs(manifest: &[PathBuf], suffix: &str) -> Result<u64> {
    let marker = format!("{suffix}.jsonl");
    let mut deleted = 0u64;
    for dir in manifest {
        for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
            let path = entry?.path();
            let is_output = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&marker))
                .unwrap_or(false);
            if is_output {
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

fn normalize_domain(dir: &Path, dir_name: &str, suffix: &str) -> Result<DomainNormalizeStats> {
    let marker = format!("{suffix}.jsonl");
    let mut inputs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".jsonl") && !n.ends_with(&marker))
                .unwrap_or(false)
        })
        .collect();
    inputs.sort();
    if inputs.is_empty() {
        bail!("no sample files in {}", dir.display());
    }

    let mut stats = DomainNormalizeStats {
        domain: dir_name.to_string(),
        source_files: inputs.len() as u64,
        total_records: 0,
        markdown: 0,
        raw: 0,
        error: 0,
    };
    let mut merged: Vec<NormalizedRecord> = Vec::new();
    for input in &inputs {
        let source_file = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (records, _corrupt) = match read_jsonl_lossy::<RoutedRecord>(input) {
            Ok(read) => read,
            Err(err) => {
                // Unreadable input contributes nothing; siblings continue.
                tracing::warn!(file = %input.display(), %err, "sample file unreadable");
                continue;
            }
        };
        for record in records {
            stats.total_records += 1;
            let normalized = normalize_record(record, &source_file);
            match normalized.format_tag {
                FormatTag::Markdown => stats.markdown += 1,
                FormatTag::Raw => stats.raw += 1,
                FormatTag::Error => stats.error += 1,
            }
            merged.push(normalized);
        }
    }

    write_jsonl(&normalized_file(dir, dir_name, suffix), &merged)?;
    Ok(stats)
}

/// Converts one sampled record. Extractor panics are downgraded to the
/// `error` tag; the raw content is always preserved.
fn normalize_record(record: RoutedRecord, source_file: &str) -> NormalizedRecord {
    normalize_record_with(record, source_file, extract_markdown)
}

fn normalize_record_with<F>(record: RoutedRecord, source_file: &str, extract: F) -> NormalizedRecord
where
    F: FnOnce(&str) -> Option<String>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| extract(&record.content)));
    let (text, format_tag) = match outcome {
        Ok(Some(markdown)) => (markdown, FormatTag::Markdown),
        Ok(None) => (record.content.clone(), FormatTag::Raw),
        Err(_) => {
            tracing::warn!(url = %record.url, "extractor panicked; content preserved");
            (record.content.clone(), FormatTag::Error)
        }
    };
    NormalizedRecord {
        url: record.url,
        domain: record.domain,
        content: record.content,
        text,
        format_tag,
        source_file: source_file.to_string(),
        extra: record.extra,
    }
}
