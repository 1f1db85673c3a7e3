//! `failures.jsonl`: one line per selection path the run gave up on.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Kind, Result},
    path::SelectionPath,
    retry::Failure,
    transport::Request,
};

pub const FILE_NAME: &str = "failures.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub selection_path: SelectionPath,
    pub what: String,
    pub attempts: u32,
    pub error: String,
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
}

impl Entry {
    pub fn new(failure: &Failure, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            selection_path: failure.path.clone(),
            what: failure.what.to_owned(),
            attempts: failure.attempts,
            error: failure.cause.to_string(),
            kind: failure.kind(),
            request: failure.request.clone(),
        }
    }
}

pub struct Journal {
    file: File,
    path: PathBuf,
    recorded: usize,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path, recorded: 0 })
    }

    pub fn record(&mut self, failure: &Failure) -> Result<()> {
        tracing::error!(target: "journal", "{failure}");
        let mut line = serde_json::to_string(&Entry::new(failure, Utc::now()))?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.recorded += 1;
        Ok(())
    }

    /// Entries written through this handle.
    #[inline]
    pub const fn recorded(&self) -> usize {
        self.recorded
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Every well-formed entry in the journal at `path`; unparsable lines are skipped.
pub fn read(path: &Path) -> Result<Vec<Entry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(target: "journal", "skipping bad line in {}: {e}", path.display()),
        }
    }
    Ok(entries)
}
