//! CSV persistence
//!
//! Rows are appended table by table as each unit of work finishes. Every
//! `append` flushes and fsyncs before returning, so a crash loses at most
//! the unit in flight. Rows whose key columns are already present in the
//! file are skipped; keys are loaded from disk the first time a file is
//! touched, which keeps resumed runs from writing duplicates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::records::{Row, Schema};

/// A CSV row read back as column name → cell text.
pub type Record = BTreeMap<String, String>;

/// Destination for scraped rows.
pub trait RowSink {
    /// Append `rows` to the table at `path` (relative to the sink's root).
    /// Returns the number of rows actually written after de-duplication.
    fn append(&mut self, path: &Path, schema: &Schema, rows: &[Row]) -> Result<usize>;

    /// Every row previously stored at `path`. A missing table yields none.
    fn read(&self, path: &Path) -> Result<Vec<Record>>;
}

/// Joins key cells into one lookup string. Unit separator never appears in
/// upstream text.
fn key_of(cells: impl IntoIterator<Item = String>) -> String {
    cells.into_iter().collect::<Vec<_>>().join("\u{1f}")
}

/// CSV files under one output directory.
pub struct CsvStore {
    root: PathBuf,
    seen: HashMap<PathBuf, HashSet<String>>,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seen: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Whether a table file exists and holds at least a header.
    pub fn exists(&self, relative: &Path) -> bool {
        std::fs::metadata(self.path(relative))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Keys already on disk for `schema` at `full`.
    fn load_keys(full: &Path, schema: &Schema) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        if !full.exists() {
            return Ok(keys);
        }
        let mut reader = csv::Reader::from_path(full)?;
        let headers = reader.headers()?.clone();
        let positions = schema
            .key
            .iter()
            .map(|k| {
                headers.iter().position(|h| h == *k).ok_or_else(|| {
                    Error::Persistence(format!(
                        "{} has no key column {k:?}",
                        full.display()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for record in reader.records() {
            let record = record?;
            keys.insert(key_of(
                positions
                    .iter()
                    .map(|&i| record.get(i).unwrap_or_default().to_string()),
            ));
        }
        debug!(path = %full.display(), keys = keys.len(), "loaded existing keys");
        Ok(keys)
    }
}

impl RowSink for CsvStore {
    fn append(&mut self, path: &Path, schema: &Schema, rows: &[Row]) -> Result<usize> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !self.seen.contains_key(&full) {
            let keys = Self::load_keys(&full, schema)?;
            self.seen.insert(full.clone(), keys);
        }
        let Some(seen) = self.seen.get(&full) else {
            return Err(Error::Persistence(format!(
                "no key index for {}",
                full.display()
            )));
        };

        let mut batch_keys = HashSet::new();
        let fresh: Vec<Vec<String>> = rows
            .iter()
            .map(|row| schema.cells(row))
            .filter(|cells| {
                let key = key_of(schema.key.iter().map(|k| {
                    schema
                        .columns
                        .iter()
                        .position(|c| c == k)
                        .map(|i| cells[i].clone())
                        .unwrap_or_default()
                }));
                !seen.contains(&key) && batch_keys.insert(key)
            })
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let needs_header = std::fs::metadata(&full)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&full)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));

        if needs_header {
            writer.write_record(schema.columns)?;
        }
        for cells in &fresh {
            writer.write_record(cells)?;
        }
        writer.flush()?;

        let file: File = writer
            .into_inner()
            .map_err(|e| Error::Persistence(format!("flushing {}: {e}", full.display())))?
            .into_inner()
            .map_err(|e| Error::Persistence(format!("flushing {}: {e}", full.display())))?;
        file.sync_all()?;

        // Only rows that reached the disk count as seen.
        if let Some(seen) = self.seen.get_mut(&full) {
            seen.extend(batch_keys);
        }

        debug!(
            path = %full.display(),
            table = schema.name,
            written = fresh.len(),
            skipped = rows.len() - fresh.len(),
            "appended rows"
        );
        Ok(fresh.len())
    }

    fn read(&self, path: &Path) -> Result<Vec<Record>> {
        read_records(&self.path(path))
    }
}

/// Read a CSV file with headers into records. A missing file yields none.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        out.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        );
    }
    Ok(out)
}
