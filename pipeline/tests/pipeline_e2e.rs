//! End-to-end coverage of the four pipeline stages against real temp trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use strata_core::persist::{load_json, read_jsonl_lossy, write_jsonl, SampleStats};
use strata_core::rng::stable_hash_str;
use strata_core::{FormatTag, NormalizedRecord, RoutedRecord};
use strata_pipeline::count::{self, CountArgs};
use strata_pipeline::normalize::{self, NormalizeArgs};
use strata_pipeline::route::{self, RouteArgs};
use strata_pipeline::sample::{self, SampleArgs};
use tempfile::TempDir;

fn record_line(url: &str, content: &str) -> String {
    format!(
        "{{\"url\":{},\"content\":{}}}",
        serde_json::to_string(url).unwrap(),
        serde_json::to_string(content).unwrap()
    )
}

fn write_shard(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn routed(url: &str, domain: &str, content: &str) -> RoutedRecord {
    RoutedRecord {
        url: url.to_string(),
        domain: domain.to_string(),
        file_source: "part-00000.jsonl".to_string(),
        content: content.to_string(),
        extra: BTreeMap::new(),
    }
}

fn count_args(shards: &Path, output: &Path, min_freq: u64) -> CountArgs {
    CountArgs {
        shards: shards.to_path_buf(),
        output: output.to_path_buf(),
        min_freq,
        chunk_size: 2,
        workers: 2,
    }
}

#[test]
fn count_thresholds_domains_and_reports_totals() {
    let tmp = TempDir::new().unwrap();
    let shards = tmp.path().join("shards");
    let lines = vec![
        record_line("https://a.com/1", "x"),
        record_line("https://a.com/2", "x"),
        record_line("https://a.com/3", "x"),
        record_line("http://b.com/1", "x"),
        record_line("not a url", "x"),
        "{not json".to_string(),
    ];
    write_shard(&shards, "part-00000.jsonl", &lines);

    let output = tmp.path().join("url_stats.json");
    let report = count::run(&count_args(&shards, &output, 2)).unwrap();

    assert_eq!(report.summary.total_records, 6);
    assert_eq!(report.summary.valid_urls, 4);
    assert_eq!(report.summary.invalid_urls, 1);
    assert_eq!(report.summary.corrupt_rows, 1);
    assert_eq!(report.summary.unique_domains_total, 2);
    assert_eq!(report.summary.unique_domains_kept, 1);
    assert_eq!(report.domains.get("a.com"), Some(&3));
    assert!(!report.domains.contains_key("b.com"));
    assert_eq!(report.protocols.get("https"), Some(&3));
    assert_eq!(report.protocols.get("http"), Some(&1));
    assert_eq!(report.top_domains[0].domain, "a.com");

    // The written report round-trips.
    let reloaded: strata_core::persist::FrequencyReport = load_json(&output).unwrap();
    assert_eq!(reloaded.domains, report.domains);
}

#[test]
fn count_rejects_empty_input() {
    let tmp = TempDir::new().unwrap();
    let shards = tmp.path().join("shards");
    fs::create_dir_all(&shards).unwrap();
    let output = tmp.path().join("url_stats.json");
    assert!(count::run(&count_args(&shards, &output, 1)).is_err());

    let mut args = count_args(&shards, &output, 1);
    args.chunk_size = 0;
    assert!(count::run(&args).is_err());
}

#[test]
fn unreadable_shard_is_recorded_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let shards = tmp.path().join("shards");
    write_shard(
        &shards,
        "part-00000.jsonl",
        &[record_line("https://a.com/1", "x"), record_line("https://a.com/2", "x")],
    );
    // Invalid UTF-8 partway through: the whole shard fails mid-read.
    let mut bad = record_line("https://b.com/1", "x").into_bytes();
    bad.push(b'\n');
    bad.extend_from_slice(&[0xff, 0xfe, 0xfd]);
    fs::write(shards.join("part-00001.jsonl"), bad).unwrap();

    let output = tmp.path().join("url_stats.json");
    let report = count::run(&count_args(&shards, &output, 1)).unwrap();

    assert_eq!(report.summary.failed_shards.len(), 1);
    assert!(report.summary.failed_shards[0].ends_with("part-00001.jsonl"));
    // The failed shard contributes nothing; its sibling still counts fully.
    assert_eq!(report.summary.total_records, 2);
    assert_eq!(report.domains.get("a.com"), Some(&2));
    assert!(!report.domains.contains_key("b.com"));
}

fn route_fixture(tmp: &TempDir) -> (PathBuf, PathBuf, RouteArgs) {
    let shards = tmp.path().join("shards");
    write_shard(
        &shards,
        "part-00000.jsonl",
        &[
            record_line("https://a.com/1", "one"),
            record_line("https://a.com/2", "two"),
            record_line("https://b.com/1", "other"),
        ],
    );
    write_shard(
        &shards,
        "part-00001.jsonl",
        &[
            record_line("https://a.com/3", "three"),
            record_line("https://a.com/4", "four"),
            record_line("https://a.com/5", "five"),
        ],
    );
    let report = tmp.path().join("url_stats.json");
    count::run(&count_args(&shards, &report, 1)).unwrap();

    let buckets = tmp.path().join("buckets");
    let args = RouteArgs {
        shards,
        report: report.clone(),
        output: buckets.clone(),
        min_freq: 5,
        chunk_size: 2,
        flush_threshold: 2,
        workers: 2,
        cleanup: false,
    };
    (report, buckets, args)
}

fn bucket_records(dir: &Path) -> Vec<RoutedRecord> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    let mut records = Vec::new();
    for file in files {
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("part-") && name.ends_with(".jsonl"), "unexpected {name}");
        let (recs, corrupt) = read_jsonl_lossy::<RoutedRecord>(&file).unwrap();
        assert_eq!(corrupt, 0);
        records.extend(recs);
    }
    records
}

#[test]
fn route_partitions_allowed_domains_into_merged_buckets() {
    let tmp = TempDir::new().unwrap();
    let (_, buckets, args) = route_fixture(&tmp);
    let summary = route::run(&args).unwrap();

    assert_eq!(summary.total_records, 6);
    assert_eq!(summary.records_routed, 5);
    assert_eq!(summary.records_dropped, 1);
    assert_eq!(summary.domains.get("a.com"), Some(&5));
    assert!(summary.failed_shards.is_empty());

    let records = bucket_records(&buckets.join("a_com"));
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.domain == "a.com"));
    assert!(records.iter().all(|r| r.file_source.starts_with("part-")));
    assert!(!buckets.join("b_com").exists());
    assert!(buckets.join("routing_summary.json").exists());
}

#[test]
fn route_preserve_skips_merged_buckets_and_cleanup_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let (_, buckets, args) = route_fixture(&tmp);
    route::run(&args).unwrap();
    let first = bucket_records(&buckets.join("a_com"));
    assert_eq!(first.len(), 5);

    // Preserve mode leaves the merged bucket untouched.
    let preserved = route::run(&args).unwrap();
    assert_eq!(preserved.skipped_domains, vec!["a.com".to_string()]);
    assert_eq!(preserved.records_routed, 0);
    assert_eq!(bucket_records(&buckets.join("a_com")).len(), 5);

    // Cleanup mode rebuilds it from scratch, without duplication.
    let mut cleanup_args = args.clone();
    cleanup_args.cleanup = true;
    let rebuilt = route::run(&cleanup_args).unwrap();
    assert!(rebuilt.skipped_domains.is_empty());
    assert_eq!(rebuilt.records_routed, 5);
    assert_eq!(bucket_records(&buckets.join("a_com")).len(), 5);
}

fn sample_fixture(tmp: &TempDir) -> PathBuf {
    let buckets = tmp.path().join("buckets");
    let a_com = buckets.join("a_com");
    for file_idx in 0..3 {
        let records: Vec<RoutedRecord> = (0..10)
            .map(|i| routed(&format!("https://a.com/{file_idx}/{i}"), "a.com", "x"))
            .collect();
        write_jsonl(&a_com.join(format!("part-{file_idx:05}.jsonl")), &records).unwrap();
    }
    // Empty bucket: routed domain whose files were removed out of band.
    fs::create_dir_all(buckets.join("b_com")).unwrap();
    buckets
}

fn sample_args(buckets: &Path, output: &Path) -> SampleArgs {
    SampleArgs {
        buckets: buckets.to_path_buf(),
        output: output.to_path_buf(),
        sample_size: 12,
        max_files: 2,
        seed: 7,
        workers: 2,
    }
}

#[test]
fn sampling_is_deterministic_and_bounded() {
    let tmp = TempDir::new().unwrap();
    let buckets = sample_fixture(&tmp);

    let out1 = tmp.path().join("samples1");
    let out2 = tmp.path().join("samples2");
    let summary = sample::run(&sample_args(&buckets, &out1)).unwrap();
    sample::run(&sample_args(&buckets, &out2)).unwrap();

    // Identical seed, identical draw, byte for byte.
    let samples1 = fs::read(out1.join("a_com").join("a_com_samples.jsonl")).unwrap();
    let samples2 = fs::read(out2.join("a_com").join("a_com_samples.jsonl")).unwrap();
    assert!(!samples1.is_empty());
    assert_eq!(samples1, samples2);

    let stats: SampleStats = load_json(&out1.join("a_com").join("a_com_stats.json")).unwrap();
    assert_eq!(stats.files_available, 3);
    assert_eq!(stats.files_considered, 2);
    assert_eq!(stats.records_available, 20);
    assert_eq!(stats.records_sampled, 12);
    assert_eq!(stats.seed_used, stable_hash_str(7, "a_com"));

    // The empty bucket yields an empty sample, not a failure.
    let empty: SampleStats = load_json(&out1.join("b_com").join("b_com_stats.json")).unwrap();
    assert_eq!(empty.records_sampled, 0);
    assert_eq!(summary.total_domains, 2);
    assert_eq!(summary.sampled_domains, 1);
    assert_eq!(summary.empty_domains, 1);
    assert_eq!(summary.total_records_sampled, 12);

    let (drawn, _) =
        read_jsonl_lossy::<RoutedRecord>(&out1.join("a_com").join("a_com_samples.jsonl")).unwrap();
    assert_eq!(drawn.len(), 12);
    assert!(drawn.iter().all(|r| r.domain == "a.com"));
}

#[test]
fn sampling_takes_everything_when_short() {
    let tmp = TempDir::new().unwrap();
    let buckets = tmp.path().join("buckets");
    let records: Vec<RoutedRecord> =
        (0..3).map(|i| routed(&format!("https://a.com/{i}"), "a.com", "x")).collect();
    write_jsonl(&buckets.join("a_com").join("part-00000.jsonl"), &records).unwrap();

    let out = tmp.path().join("samples");
    let mut args = sample_args(&buckets, &out);
    args.sample_size = 100;
    let summary = sample::run(&args).unwrap();

    assert_eq!(summary.total_records_sampled, 3);
    let (drawn, _) =
        read_jsonl_lossy::<RoutedRecord>(&out.join("a_com").join("a_com_samples.jsonl")).unwrap();
    assert_eq!(drawn.len(), 3);
}

#[test]
fn unreadable_bucket_file_contributes_zero_with_warning() {
    let tmp = TempDir::new().unwrap();
    let buckets = tmp.path().join("buckets");
    let a_com = buckets.join("a_com");
    let records: Vec<RoutedRecord> =
        (0..4).map(|i| routed(&format!("https://a.com/{i}"), "a.com", "x")).collect();
    write_jsonl(&a_com.join("part-00000.jsonl"), &records).unwrap();
    fs::write(a_com.join("part-00001.jsonl"), [0xff, 0xfe, 0xfd]).unwrap();

    let out = tmp.path().join("samples");
    let mut args = sample_args(&buckets, &out);
    args.sample_size = 10;
    args.max_files = 2;
    let summary = sample::run(&args).unwrap();

    // The sweep completes; the bad file is surfaced, not fatal.
    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warnings[0].contains("part-00001.jsonl"));
    let stats: SampleStats = load_json(&out.join("a_com").join("a_com_stats.json")).unwrap();
    assert_eq!(stats.files_considered, 2);
    assert_eq!(stats.records_available, 4);
    assert_eq!(stats.records_sampled, 4);
}

fn normalize_fixture(tmp: &TempDir) -> PathBuf {
    let samples = tmp.path().join("samples");
    let records = vec![
        routed("https://a.com/1", "a.com", "<h1>Title</h1><p>Body text</p>"),
        routed("https://a.com/2", "a.com", "   "),
        routed("https://a.com/3", "a.com", "hello world"),
    ];
    write_jsonl(&samples.join("a_com").join("a_com_samples.jsonl"), &records).unwrap();
    samples
}

fn normalize_args(samples: &Path) -> NormalizeArgs {
    NormalizeArgs {
        samples: samples.to_path_buf(),
        output_suffix: "_markdown".to_string(),
        workers: 1,
        cleanup: false,
    }
}

#[test]
fn normalize_tags_records_and_merges_per_domain() {
    let tmp = TempDir::new().unwrap();
    let samples = normalize_fixture(&tmp);
    let summary = normalize::run(&normalize_args(&samples)).unwrap();

    assert_eq!(summary.processed_domains, 1);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.markdown, 2);
    assert_eq!(summary.raw, 1);
    assert_eq!(summary.error, 0);

    let out = samples.join("a_com").join("a_com_markdown.jsonl");
    let (records, _) = read_jsonl_lossy::<NormalizedRecord>(&out).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.source_file == "a_com_samples.jsonl"));

    let html = &records[0];
    assert_eq!(html.format_tag, FormatTag::Markdown);
    assert!(html.text.contains("# Title"));
    assert!(html.text.contains("Body text"));
    assert_eq!(html.content, "<h1>Title</h1><p>Body text</p>");

    let blank = &records[1];
    assert_eq!(blank.format_tag, FormatTag::Raw);
    assert_eq!(blank.text, blank.content);

    assert!(samples.join("normalization_summary.json").exists());
}

#[test]
fn normalize_preserve_skips_and_cleanup_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let samples = normalize_fixture(&tmp);
    let args = normalize_args(&samples);
    normalize::run(&args).unwrap();

    // Preserve mode must not touch an existing merged output.
    let out = samples.join("a_com").join("a_com_markdown.jsonl");
    fs::write(&out, b"sentinel\n").unwrap();
    let preserved = normalize::run(&args).unwrap();
    assert_eq!(preserved.skipped_domains, vec!["a_com".to_string()]);
    assert_eq!(preserved.processed_domains, 0);
    assert_eq!(fs::read(&out).unwrap(), b"sentinel\n");

    // Cleanup mode deletes it and regenerates from the sample files.
    let mut cleanup_args = args.clone();
    cleanup_args.cleanup = true;
    let rebuilt = normalize::run(&cleanup_args).unwrap();
    assert_eq!(rebuilt.deleted_outputs, 1);
    assert_eq!(rebuilt.processed_domains, 1);
    let (records, _) = read_jsonl_lossy::<NormalizedRecord>(&out).unwrap();
    assert_eq!(records.len(), 3);
}
