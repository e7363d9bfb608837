//! Append-only raw-response archive, one gzip JSONL file per UTC day.

use anyhow::{Context, Result};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append every raw item in the payload's `data` list (pre-normalization) as
/// one JSON line to `<YYYYMMDD>_books.jsonl.gz` under `out_dir`. The file is
/// opened in append mode, so repeated calls within a day accumulate into one
/// file and a new file appears at day rollover. The gzip write runs on the
/// blocking pool so archival I/O never stalls request dispatch.
pub async fn archive_books(raw: &Value, out_dir: &Path) -> Result<()> {
    let items = match raw.get("data").and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items.clone(),
        _ => return Ok(()),
    };

    let out_file = archive_path(out_dir);
    tokio::task::spawn_blocking(move || append_items(&items, &out_file))
        .await
        .context("archive task panicked")?
}

fn archive_path(out_dir: &Path) -> PathBuf {
    let date_str = Utc::now().format("%Y%m%d");
    out_dir.join(format!("{date_str}_books.jsonl.gz"))
}

fn append_items(items: &[Value], out_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(out_file)
        .with_context(|| format!("failed to open archive {}", out_file.display()))?;
    // Each call appends a fresh gzip member; readers must use a multi-member
    // decoder (e.g. flate2's MultiGzDecoder or plain `zcat`).
    let mut encoder = GzEncoder::new(file, Compression::default());
    for item in items {
        serde_json::to_writer(&mut encoder, item)?;
        encoder.write_all(b"\n")?;
    }
    encoder.finish().context("failed to flush archive")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use serde_json::json;
    use std::io::BufRead;

    fn read_lines(path: &Path) -> Vec<Value> {
        let file = std::fs::File::open(path).unwrap();
        let reader = std::io::BufReader::new(MultiGzDecoder::new(file));
        reader
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn appends_accumulate_into_one_daily_file() {
        let td = tempfile::tempdir().unwrap();
        let raw1 = json!({"data": [{"isbn13": "a"}, {"isbn13": "b"}]});
        let raw2 = json!({"data": [{"isbn13": "c"}]});

        archive_books(&raw1, td.path()).await.unwrap();
        archive_books(&raw2, td.path()).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(td.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_books.jsonl.gz"));

        let lines = read_lines(&files[0]);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["isbn13"], "c");
    }

    #[tokio::test]
    async fn empty_payload_writes_nothing() {
        let td = tempfile::tempdir().unwrap();
        archive_books(&json!({"data": []}), td.path()).await.unwrap();
        archive_books(&json!({}), td.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(td.path()).unwrap().count(), 0);
    }
}
