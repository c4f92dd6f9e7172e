//! Append-only JSONL log of completed records, one per line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::CompletedRecord;

pub struct JsonlSink {
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        Ok(JsonlSink {
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Writes and flushes one record so a crash loses at most the current line.
    pub fn append(&mut self, record: &CompletedRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

pub fn read_records(path: &Path) -> Result<Vec<CompletedRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{:?} line {}", path, i + 1))?;
        records.push(record);
    }
    Ok(records)
}
