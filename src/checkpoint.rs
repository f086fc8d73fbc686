//! Checkpoint registry.
//!
//! A flat directory holds opaque weight files `<i>.pt` and a text file
//! `best` with the index of the current best checkpoint. Weight files are
//! write-once; `best` is only ever replaced through an atomic rename, and
//! readers treat any read failure as transient. Evaluation-match outcomes
//! are appended to a `results.csv` next to the weights.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::{Error, Result};

const BEST_FILE: &str = "best";
const RESULTS_FILE: &str = "results.csv";
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// One row of the evaluation log.
#[derive(Debug, Serialize)]
pub struct EvalRow {
    pub ckpt_idx: u64,
    pub games: u64,
    pub candidate_won: bool,
    pub promoted: bool,
}

#[derive(Debug, Clone)]
pub struct CheckpointRegistry {
    dir: PathBuf,
}

impl CheckpointRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> CheckpointRegistry {
        CheckpointRegistry { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn ckpt_path(&self, idx: u64) -> PathBuf {
        self.dir.join(format!("{idx}.pt"))
    }

    fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_FILE)
    }

    /// Read the current best index. Every failure is reported as
    /// transient; concurrent writers only ever replace the file atomically,
    /// so a retry will see either the old or the new index.
    pub fn read_best(&self) -> Result<u64> {
        let text = fs::read_to_string(self.best_path())
            .map_err(|e| Error::CheckpointUnavailable(format!("reading best index: {e}")))?;
        text.trim()
            .parse()
            .map_err(|e| Error::CheckpointUnavailable(format!("parsing best index: {e}")))
    }

    /// Block until the best index is readable.
    pub fn wait_best(&self) -> u64 {
        loop {
            match self.read_best() {
                Ok(idx) => return idx,
                Err(e) => {
                    log::warn!("cannot get best ckpt index temporarily: {e}");
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    /// Publish a new best index: write a temp file, then rename it onto
    /// `best`. Refuses to move the index backwards; a concurrent promotion
    /// that already advanced past `idx` surfaces as [`Error::PromotionRaced`].
    pub fn write_best(&self, idx: u64) -> Result<()> {
        if let Ok(current) = self.read_best() {
            if current > idx {
                return Err(Error::PromotionRaced {
                    current,
                    attempted: idx,
                });
            }
        }
        let tmp = self.dir.join(format!(".{BEST_FILE}.tmp"));
        fs::write(&tmp, idx.to_string())?;
        fs::rename(&tmp, self.best_path())?;
        Ok(())
    }

    /// Largest checkpoint index present in the directory, if any. Files
    /// whose stem is not a plain integer are ignored.
    pub fn latest_ckpt(&self) -> Result<Option<u64>> {
        let pattern = self.dir.join("*.pt");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-utf8 checkpoint dir {:?}", self.dir)))?;
        let entries = glob::glob(pattern)
            .map_err(|e| Error::CheckpointUnavailable(format!("scanning checkpoints: {e}")))?;
        let mut latest = None;
        for entry in entries.flatten() {
            let idx = entry
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(idx) = idx {
                latest = latest.max(Some(idx));
            }
        }
        Ok(latest)
    }

    /// Append one evaluation outcome to `results.csv`, creating it with a
    /// header row on first use.
    pub fn append_eval_row(&self, row: &EvalRow) -> Result<()> {
        let path = self.dir.join(RESULTS_FILE);
        let fresh = !path.exists();
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}
