use super::LOG_TARGET;
use super::metrics_record::{MetricsRecord, RecordKey};
use crate::{HashMap, HashSet, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ohno::IntoAppError;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// What a merge changed in the output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub replaced: usize,
    pub total_rows: usize,
}

/// Tracks what has already been harvested and merges new records into the output file.
///
/// The output file is the checkpoint: on open, every pull request key and repository it
/// mentions is loaded, together with the keys of any read-only prior output files. Each
/// merge re-reads the output, folds in the new records (last write wins, first position
/// kept), and replaces the file atomically through a temporary file in the same directory.
#[derive(Debug)]
pub struct CheckpointStore {
    output_path: Utf8PathBuf,
    known_keys: HashSet<RecordKey>,
    known_candidates: HashSet<String>,
    pending: Vec<MetricsRecord>,
    total_rows: usize,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    repo: String,
    pr_number: u64,
}

impl CheckpointStore {
    /// Load the checkpoint from the output file and any prior output files.
    ///
    /// Missing files are treated as empty. Unreadable or malformed files are an error.
    pub fn open(output_path: impl Into<Utf8PathBuf>, prior_outputs: &[Utf8PathBuf]) -> Result<Self> {
        let output_path = output_path.into();
        let mut store = Self {
            output_path,
            known_keys: HashSet::default(),
            known_candidates: HashSet::default(),
            pending: Vec::new(),
            total_rows: 0,
        };

        for prior in prior_outputs {
            let keys = read_keys(prior)?;
            log::info!(target: LOG_TARGET, "Loaded {} records from prior output '{prior}'", keys.len());
            store.remember(keys);
        }

        let existing = read_keys(&store.output_path)?;
        store.total_rows = existing.len();
        store.remember(existing);

        log::info!(
            target: LOG_TARGET,
            "Checkpoint knows {} repositories and {} pull requests",
            store.known_candidates.len(),
            store.known_keys.len()
        );

        Ok(store)
    }

    fn remember(&mut self, keys: impl IntoIterator<Item = RecordKey>) {
        for key in keys {
            let _ = self.known_candidates.insert(key.repo.clone());
            let _ = self.known_keys.insert(key);
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }

    #[cfg(test)]
    #[must_use]
    pub fn contains_candidate(&self, candidate_id: &str) -> bool {
        self.known_candidates.contains(candidate_id)
    }

    /// Whether the pull request is already in the output or a prior output.
    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.known_keys.contains(key)
    }

    #[must_use]
    pub const fn known_candidates(&self) -> &HashSet<String> {
        &self.known_candidates
    }

    /// Rows in the output file after the last successful persist.
    #[must_use]
    pub const fn total_rows(&self) -> usize {
        self.total_rows
    }

    #[cfg(test)]
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Merge `records` into the output file and write it out.
    ///
    /// On failure the records stay pending so that a later [`flush`](Self::flush) can retry.
    pub fn merge_and_persist(&mut self, records: Vec<MetricsRecord>) -> Result<MergeOutcome> {
        self.pending.extend(records);
        self.persist()
    }

    /// Persist anything still pending. Does nothing when there is nothing to write.
    pub fn flush(&mut self) -> Result<MergeOutcome> {
        self.persist()
    }

    fn persist(&mut self) -> Result<MergeOutcome> {
        if self.pending.is_empty() {
            return Ok(MergeOutcome {
                total_rows: self.total_rows,
                ..MergeOutcome::default()
            });
        }

        let mut rows = read_records(&self.output_path)?;
        let mut positions: HashMap<RecordKey, usize> = rows.iter().enumerate().map(|(i, r)| (r.key(), i)).collect();
        let mut outcome = MergeOutcome::default();

        for record in &self.pending {
            let key = record.key();
            if let Some(&pos) = positions.get(&key) {
                rows[pos] = record.clone();
                outcome.replaced += 1;
            } else {
                let _ = positions.insert(key, rows.len());
                rows.push(record.clone());
                outcome.added += 1;
            }
        }

        write_atomically(&self.output_path, &rows)?;

        let keys: Vec<_> = self.pending.drain(..).map(|r| r.key()).collect();
        self.remember(keys);
        self.total_rows = rows.len();
        outcome.total_rows = rows.len();

        log::info!(
            target: LOG_TARGET,
            "Saved {} new and {} updated records to '{}' ({} total)",
            outcome.added,
            outcome.replaced,
            self.output_path,
            outcome.total_rows
        );

        Ok(outcome)
    }
}

fn read_keys(path: &Utf8Path) -> Result<Vec<RecordKey>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path).into_app_err_with(|| format!("opening '{path}'"))?;
    reader
        .deserialize::<KeyRow>()
        .map(|row| {
            row.map(|r| RecordKey::new(r.repo, r.pr_number))
                .into_app_err_with(|| format!("reading '{path}'"))
        })
        .collect()
}

fn read_records(path: &Utf8Path) -> Result<Vec<MetricsRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path).into_app_err_with(|| format!("opening '{path}'"))?;
    reader
        .deserialize::<MetricsRecord>()
        .map(|row| row.into_app_err_with(|| format!("reading '{path}'")))
        .collect()
}

fn write_atomically(path: &Utf8Path, rows: &[MetricsRecord]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };

    fs::create_dir_all(dir).into_app_err_with(|| format!("creating directory '{dir}'"))?;

    let mut tmp = NamedTempFile::new_in(dir).into_app_err_with(|| format!("creating temporary file in '{dir}'"))?;

    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        for row in rows {
            writer.serialize(row).into_app_err_with(|| format!("serializing record for '{path}'"))?;
        }
        writer.flush().into_app_err_with(|| format!("writing '{path}'"))?;
    }

    tmp.as_file_mut().flush().into_app_err_with(|| format!("writing '{path}'"))?;
    tmp.as_file().sync_all().into_app_err_with(|| format!("syncing '{path}'"))?;

    let _ = tmp.persist(path).into_app_err_with(|| format!("replacing '{path}'"))?;
    Ok(())
}
