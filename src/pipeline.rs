//! The fetch → reconcile → render pipeline

use crate::core::config::Commodities;
use crate::core::error::{PriceDbError, Result};
use crate::core::price::{PriceRecord, PriceSource, sort_chronologically};
use crate::ledger::render_ledger;
use crate::pricedb::{PriceDatabase, dedup_against_fetched};
use chrono::{NaiveDate, NaiveTime};
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Concatenates fetched and surviving database records into one
/// chronological sequence.
pub fn merge_records(fetched: Vec<PriceRecord>, kept: Vec<PriceRecord>) -> Vec<PriceRecord> {
    let mut merged = fetched;
    merged.extend(kept);
    sort_chronologically(&mut merged);
    merged
}

/// Drops the prefix of `records` before `start_date`. `records` must be sorted.
pub fn filter_from_start_date(
    mut records: Vec<PriceRecord>,
    start_date: Option<NaiveDate>,
) -> Vec<PriceRecord> {
    let Some(start) = start_date.and_then(|d| d.and_hms_opt(0, 0, 0)) else {
        return records;
    };
    match records.iter().position(|record| record.timestamp >= start) {
        Some(first) => records.split_off(first),
        None => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    SourcesFetched,
    DatabaseParsed,
    Deduplicated,
    Merged,
    Filtered,
    Rendered,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Stage::Init => "init",
                Stage::SourcesFetched => "sources fetched",
                Stage::DatabaseParsed => "database parsed",
                Stage::Deduplicated => "deduplicated",
                Stage::Merged => "merged",
                Stage::Filtered => "filtered",
                Stage::Rendered => "rendered",
                Stage::Done => "done",
            }
        )
    }
}

/// Terminal failure of a run. `stage` is the last stage that completed.
#[derive(Error, Debug)]
#[error("price update failed after stage '{stage}'")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: PriceDbError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// An empty path means standard output.
    pub fn from_path(path: PathBuf) -> Self {
        if path.as_os_str().is_empty() {
            Destination::Stdout
        } else {
            Destination::File(path)
        }
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Stdout => write!(f, "stdout"),
            Destination::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub close_time: NaiveTime,
    pub start_date: Option<NaiveDate>,
    pub commodities: Commodities,
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub fetched: usize,
    pub kept_from_database: usize,
    pub written: usize,
}

pub struct Pipeline {
    options: PipelineOptions,
    database: PriceDatabase,
    sources: Vec<Box<dyn PriceSource>>,
    stage: Stage,
}

impl Pipeline {
    /// `database` is read up front so that the destination may be the same
    /// file.
    pub fn new(
        options: PipelineOptions,
        database: PriceDatabase,
        sources: Vec<Box<dyn PriceSource>>,
    ) -> Self {
        Pipeline {
            options,
            database,
            sources,
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn database(&self) -> &PriceDatabase {
        &self.database
    }

    fn advance(&mut self, next: Stage) {
        debug!("Pipeline stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn fail(&self, error: PriceDbError) -> PipelineFailure {
        PipelineFailure {
            stage: self.stage,
            error,
        }
    }

    #[instrument(name = "PricePipeline", skip_all, fields(destination = %self.options.destination))]
    pub async fn run(mut self) -> std::result::Result<PipelineReport, PipelineFailure> {
        let mut fetched = Vec::new();
        for source in &self.sources {
            let records = source.fetch().await.map_err(|e| self.fail(e))?;
            info!(provider = source.name(), count = records.len(), "Fetched prices");
            fetched.extend(records);
        }
        self.advance(Stage::SourcesFetched);

        let symbol_map = self.options.commodities.symbol_map();
        let database = self.database.parse(&symbol_map).map_err(|e| self.fail(e))?;
        self.advance(Stage::DatabaseParsed);

        let kept = dedup_against_fetched(&fetched, &database, self.options.close_time);
        self.advance(Stage::Deduplicated);

        let mut report = PipelineReport {
            fetched: fetched.len(),
            kept_from_database: kept.len(),
            written: 0,
        };

        let merged = merge_records(fetched, kept);
        self.advance(Stage::Merged);

        let records = filter_from_start_date(merged, self.options.start_date);
        report.written = records.len();
        self.advance(Stage::Filtered);

        let mut rendered = Vec::new();
        render_ledger(&records, &self.options.commodities, &mut rendered)
            .map_err(|e| self.fail(PriceDbError::io("<render buffer>", e)))?;
        self.advance(Stage::Rendered);

        write_output(&self.options.destination, &rendered).map_err(|e| self.fail(e))?;
        self.advance(Stage::Done);

        info!(
            fetched = report.fetched,
            kept = report.kept_from_database,
            written = report.written,
            "Price update complete"
        );
        Ok(report)
    }
}

fn write_output(destination: &Destination, rendered: &[u8]) -> Result<()> {
    match destination {
        Destination::Stdout => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered)
                .and_then(|_| stdout.flush())
                .map_err(|e| PriceDbError::io("<stdout>", e))
        }
        Destination::File(path) => replace_file(path, rendered),
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`, so
/// a failed write never leaves `path` truncated. A symlinked `path` is
/// resolved first so the link keeps pointing at the updated file.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let resolved = std::fs::canonicalize(path).ok();
    let path = resolved.as_deref().unwrap_or(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PriceDbError::io(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PriceDbError::io(tmp.path(), e))?;

    let permissions = match std::fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => default_permissions(),
    };
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| PriceDbError::io(tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| PriceDbError::io(path, e.error))?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

#[cfg(unix)]
fn default_permissions() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o640))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<std::fs::Permissions> {
    None
}
