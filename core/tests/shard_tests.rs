use std::fs;
use strata_core::shard::{list_shards, ShardChunks};
use tempfile::tempdir;

#[test]
fn chunks_are_bounded_and_cover_every_row() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("part-00000.jsonl");
    let mut body = String::new();
    for i in 0..25 {
        body.push_str(&format!(
            "{{\"url\":\"https://example.com/{i}\",\"content\":\"<p>{i}</p>\"}}\n"
        ));
    }
    fs::write(&path, body).unwrap();

    let mut chunks = ShardChunks::open(&path, 10).unwrap();
    let mut sizes = Vec::new();
    let mut total = 0usize;
    while let Some(records) = chunks.next_chunk().unwrap() {
        sizes.push(records.len());
        total += records.len();
    }
    assert_eq!(total, 25);
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(chunks.rows_read(), 25);
    assert_eq!(chunks.corrupt_rows(), 0);
}

#[test]
fn corrupt_rows_are_counted_not_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("part-00000.jsonl");
    fs::write(
        &path,
        "{\"url\":\"https://a.com/1\"}\nnot json at all\n\n{\"url\":\"https://a.com/2\"}\n{broken\n",
    )
    .unwrap();

    let mut chunks = ShardChunks::open(&path, 100).unwrap();
    let records = chunks.next_chunk().unwrap().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(chunks.corrupt_rows(), 2);
    // Blank line is ignored entirely, not counted as a row.
    assert_eq!(chunks.rows_read(), 4);
    assert!(chunks.next_chunk().unwrap().is_none());
}

#[test]
fn extra_fields_survive_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("part-00000.jsonl");
    fs::write(
        &path,
        "{\"url\":\"https://a.com/1\",\"content\":\"x\",\"lang\":\"en\",\"score\":0.5}\n",
    )
    .unwrap();

    let mut chunks = ShardChunks::open(&path, 10).unwrap();
    let records = chunks.next_chunk().unwrap().unwrap();
    assert_eq!(records[0].extra.get("lang").unwrap(), "en");
    let back = serde_json::to_string(&records[0]).unwrap();
    assert!(back.contains("\"lang\":\"en\""));
    assert!(back.contains("\"score\":0.5"));
}

#[test]
fn listing_finds_part_files_and_jsonl_only() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("part-00001"), "").unwrap();
    fs::write(dir.path().join("nested/extra.jsonl"), "").unwrap();
    fs::write(dir.path().join("notes.txt"), "").unwrap();

    let shards = list_shards(dir.path()).unwrap();
    let names: Vec<String> = shards
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["extra.jsonl", "part-00001"]);
}

#[test]
fn missing_directory_fails_fast() {
    let dir = tempdir().unwrap();
    assert!(list_shards(&dir.path().join("nope")).is_err());
}
