//! Shard discovery and bounded-chunk reading.
//!
//! Shards are JSONL files, one record per line. A shard is never materialized
//! in memory at once: `ShardChunks` hands out at most `chunk_size` decoded
//! rows at a time. Corrupt rows are counted and skipped; an I/O error while
//! reading surfaces as `Err` so the caller can record the whole shard as
//! failed and move on.

use crate::Record;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// True for files the pipeline treats as input shards: the crawl dump's
/// `part-*` naming or plain `.jsonl` files.
fn is_shard_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    name.starts_with("part-") || name.ends_with(".jsonl")
}

/// Lists shard files under `dir`, recursively, in sorted order. A missing or
/// non-directory input is stage-level misconfiguration and fails fast.
pub fn list_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("shard directory does not exist: {}", dir.display());
    }
    let mut shards: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_shard_file(path))
        .collect();
    shards.sort();
    Ok(shards)
}

/// Chunked reader over one shard file.
pub struct ShardChunks {
    lines: Lines<BufReader<File>>,
    chunk_size: usize,
    path: PathBuf,
    rows_read: u64,
    corrupt_rows: u64,
}

impl ShardChunks {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        let file = File::open(path).with_context(|| format!("open shard {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            chunk_size,
            path: path.to_path_buf(),
            rows_read: 0,
            corrupt_rows: 0,
        })
    }

    /// Next chunk of decoded records, or `None` at end of shard. Blank lines
    /// are ignored; undecodable lines increment the corrupt-row counter.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<Record>>> {
        let mut records = Vec::with_capacity(self.chunk_size);
        while records.len() < self.chunk_size {
            let line = match self.lines.next() {
                Some(line) => {
                    line.with_context(|| format!("read shard {}", self.path.display()))?
                }
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            self.rows_read += 1;
            match serde_json::from_str::<Record>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    self.corrupt_rows += 1;
                    tracing::warn!(
                        shard = %self.path.display(),
                        row = self.rows_read,
                        %err,
                        "skipping corrupt row"
                    );
                }
            }
        }
        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }

    /// Rows seen so far, including corrupt ones.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Rows skipped so far because they failed to decode.
    pub fn corrupt_rows(&self) -> u64 {
        self.corrupt_rows
    }
}
