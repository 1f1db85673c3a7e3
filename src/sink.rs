//! Durable results: `records.jsonl` plus one raw `.html` artifact per record.
//!
//! The artifact is written first; the JSON line is the commit point. A path is
//! "done" exactly when its line is in the file, so a crash between the two leaves
//! an orphaned artifact that the next run simply overwrites.

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Months, NaiveDate, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    path::{Level, SelectionPath},
    table::month_number,
};

pub const RECORDS: &str = "records.jsonl";
pub const RAW_DIR: &str = "raw";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub vehicle_type: CompactString,
    pub manufacturer: CompactString,
    pub year: CompactString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<CompactString>,
    pub raw_fragment: String,
    /// Further result pages, in order, when the table was paginated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(path: &SelectionPath, raw_fragment: String, pages: Vec<String>, scraped_at: DateTime<Utc>) -> Result<Self> {
        let (Some(vehicle_type), Some(manufacturer), Some(year)) =
            (path.get(Level::VehicleType), path.get(Level::Manufacturer), path.get(Level::Year))
        else {
            return Err(Error::ShallowPath(path.to_string()));
        };
        Ok(Self {
            vehicle_type: vehicle_type.into(),
            manufacturer: manufacturer.into(),
            year: year.into(),
            month: path.get(Level::Month).map(Into::into),
            raw_fragment,
            pages,
            scraped_at,
        })
    }

    pub fn path(&self) -> SelectionPath {
        let mut path = SelectionPath::new([&self.vehicle_type, &self.manufacturer, &self.year].map(CompactString::as_str));
        if let Some(month) = &self.month {
            path = path.child(month);
        }
        path
    }

    /// First and last day the data covers: the whole year, or the month when there is one.
    /// `None` when the labels are not a recognisable year or month.
    pub fn period(&self) -> Option<(NaiveDate, NaiveDate)> {
        let digits = self.year.trim().chars().take_while(char::is_ascii_digit).collect::<String>();
        let year = digits.parse().ok()?;
        let (first, span) = match self.month.as_deref() {
            Some(month) => (NaiveDate::from_ymd_opt(year, month_number(month)?, 1)?, Months::new(1)),
            None => (NaiveDate::from_ymd_opt(year, 1, 1)?, Months::new(12)),
        };
        Some((first, first.checked_add_months(span)?.pred_opt()?))
    }

    /// Every page of the result, first page first.
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        core::iter::once(&*self.raw_fragment).chain(self.pages.iter().map(String::as_str))
    }
}

pub trait Sink {
    fn exists(&self, path: &SelectionPath) -> bool;

    /// Durably stores `record`. `Ok(false)` if its path was already recorded.
    fn append(&mut self, record: ResultRecord) -> Result<bool>;
}

pub struct Store {
    dir: PathBuf,
    file: File,
    index: HashSet<String>,
    /// Artifact stem to the key of the path owning it.
    stems: HashMap<String, String>,
}

impl Store {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(RAW_DIR))?;
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(dir.join(RECORDS))?;
        let paths = repair(&mut file)?;
        let mut store = Self { dir, file, index: HashSet::new(), stems: HashMap::new() };
        for path in &paths {
            store.register(path);
        }
        tracing::info!(target: "sink", "{} records already in {}", store.len(), store.dir.display());
        Ok(store)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw artifact of `path`. When another path already owns the same file stem
    /// (`LMV/HMV` and `LMV HMV`), a `~2`, `~3`... suffix keeps the two apart.
    pub fn artifact(&self, path: &SelectionPath) -> PathBuf {
        self.dir.join(RAW_DIR).join(format!("{}.html", self.stem(path)))
    }

    fn stem(&self, path: &SelectionPath) -> String {
        let key = path.key();
        let base = path.file_stem();
        let mut stem = base.clone();
        let mut n = 1;
        while self.stems.get(&stem).is_some_and(|owner| *owner != key) {
            n += 1;
            stem = format!("{base}~{n}");
        }
        stem
    }

    fn register(&mut self, path: &SelectionPath) {
        let stem = self.stem(path);
        let key = path.key();
        self.stems.insert(stem, key.clone());
        self.index.insert(key);
    }

    fn write_artifact(&self, record: &ResultRecord, path: &SelectionPath) -> Result<()> {
        let stem = self.stem(path);
        if stem != path.file_stem() {
            tracing::warn!(target: "sink", "[{path}] shares its file name with another record, writing {stem}.html");
        }
        let target = self.dir.join(RAW_DIR).join(format!("{stem}.html"));
        let tmp = target.with_extension("html.tmp");
        let mut out = File::create(&tmp)?;
        for (i, fragment) in record.fragments().enumerate() {
            if i > 0 {
                out.write_all(b"\n")?;
            }
            out.write_all(fragment.as_bytes())?;
        }
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

impl Sink for Store {
    fn exists(&self, path: &SelectionPath) -> bool {
        self.index.contains(&path.key())
    }

    fn append(&mut self, record: ResultRecord) -> Result<bool> {
        let path = record.path();
        let key = path.key();
        if self.index.contains(&key) {
            tracing::warn!(target: "sink", "[{path}] already recorded, not writing again");
            return Ok(false);
        }

        self.write_artifact(&record, &path)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.register(&path);
        tracing::info!(target: "sink", "[{path}] recorded ({} page(s))", 1 + record.pages.len());
        Ok(true)
    }
}

/// Paths of the existing lines in file order, after dropping or completing a torn last line.
fn repair(file: &mut File) -> Result<Vec<SelectionPath>> {
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut index = Vec::new();
    let mut good = 0;
    let mut lines = data.split(|b| *b == b'\n').peekable();
    while let Some(line) = lines.next() {
        let last = lines.peek().is_none();
        if last {
            if line.is_empty() {
                break;
            }
            if let Ok(record) = serde_json::from_slice::<ResultRecord>(line) {
                tracing::warn!(target: "sink", "last record was missing its newline, completing it");
                file.write_all(b"\n")?;
                file.sync_data()?;
                index.push(record.path());
            } else {
                tracing::warn!(target: "sink", "truncating torn record ({} bytes)", line.len());
                file.set_len(good as u64)?;
                file.sync_data()?;
            }
            break;
        }

        good += line.len() + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ResultRecord>(line) {
            Ok(record) => index.push(record.path()),
            Err(e) => tracing::warn!(target: "sink", "ignoring unreadable record: {e}"),
        }
    }
    Ok(index)
}

/// Dashboard-side filter. Labels match ignoring case.
///
/// `since`/`until` bound the period the data covers, both ends inclusive; a
/// record matches when its year (or month) overlaps the range. The `scraped_*`
/// bounds are on `scrapedAt`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub vehicle_type: Option<String>,
    pub manufacturer: Option<String>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub scraped_since: Option<DateTime<Utc>>,
    pub scraped_until: Option<DateTime<Utc>>,
}

impl Query {
    pub fn matches(&self, record: &ResultRecord) -> bool {
        let label = |want: &Option<String>, have: &str| want.as_deref().is_none_or(|w| w.eq_ignore_ascii_case(have));
        label(&self.vehicle_type, &record.vehicle_type)
            && label(&self.manufacturer, &record.manufacturer)
            && self.in_period(record)
            && self.scraped_since.is_none_or(|t| record.scraped_at >= t)
            && self.scraped_until.is_none_or(|t| record.scraped_at <= t)
    }

    fn in_period(&self, record: &ResultRecord) -> bool {
        if self.since.is_none() && self.until.is_none() {
            return true;
        }
        let Some((first, last)) = record.period() else {
            return false;
        };
        self.since.is_none_or(|t| last >= t) && self.until.is_none_or(|t| first <= t)
    }
}

/// Read-only view over a store directory.
#[derive(Debug, Default)]
pub struct Records {
    records: Vec<ResultRecord>,
}

impl Records {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(RECORDS);
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut records = Vec::new();
        for line in BufReader::new(File::open(&path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(target: "sink", "skipping unreadable line: {e}"),
            }
        }
        Ok(Self { records })
    }

    #[inline]
    pub fn iter(&self) -> core::slice::Iter<'_, ResultRecord> {
        self.records.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn query<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a ResultRecord> + 'a {
        self.records.iter().filter(|r| query.matches(r))
    }
}
