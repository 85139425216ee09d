//! Append-only log of scoring events.
//!
//! In memory a record is a tagged [`ScoreEvent`]. At the storage boundary it
//! is flattened into a [`HistoryRow`], the nullable-column shape
//! `(id, user_id, type, timestamp, total_impact?, score?, simulated_impact?, simulated_score?)`,
//! and rows are validated on the way back in.
//!
//! Both backends serialize id allocation and timestamping under one lock, so
//! ids are dense and strictly increasing and timestamps never go backwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{HistoryBackend, HistoryConfig};
use crate::error::{Error, Result};

/// Opaque requester identity supplied by the identity collaborator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Baseline,
    Simulation,
}

impl ScoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreKind::Baseline => "baseline",
            ScoreKind::Simulation => "simulation",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreEvent {
    /// Computed from the twin's actual readings.
    Baseline { total_impact: f64, score: f64 },
    /// Computed from a hypothetical projection.
    Simulation { simulated_impact: f64, simulated_score: f64 },
}

impl ScoreEvent {
    pub fn kind(&self) -> ScoreKind {
        match self {
            ScoreEvent::Baseline { .. } => ScoreKind::Baseline,
            ScoreEvent::Simulation { .. } => ScoreKind::Simulation,
        }
    }
}

/// A record before the store has assigned its id and timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct NewScoreRecord {
    pub user_id: UserId,
    pub event: ScoreEvent,
}

impl NewScoreRecord {
    pub fn baseline(user_id: UserId, total_impact: f64, score: f64) -> Self {
        Self { user_id, event: ScoreEvent::Baseline { total_impact, score } }
    }

    pub fn simulation(user_id: UserId, simulated_impact: f64, simulated_score: f64) -> Self {
        Self { user_id, event: ScoreEvent::Simulation { simulated_impact, simulated_score } }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreRecord {
    pub id: u64,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub event: ScoreEvent,
}

impl ScoreRecord {
    pub fn kind(&self) -> ScoreKind {
        self.event.kind()
    }

    /// Baseline score, if this is a baseline record.
    pub fn score(&self) -> Option<f64> {
        match self.event {
            ScoreEvent::Baseline { score, .. } => Some(score),
            ScoreEvent::Simulation { .. } => None,
        }
    }

    pub fn total_impact(&self) -> Option<f64> {
        match self.event {
            ScoreEvent::Baseline { total_impact, .. } => Some(total_impact),
            ScoreEvent::Simulation { .. } => None,
        }
    }
}

/// Flattened persistence shape of a [`ScoreRecord`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryRow {
    pub id: u64,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: ScoreKind,
    pub timestamp: DateTime<Utc>,
    pub total_impact: Option<f64>,
    pub score: Option<f64>,
    pub simulated_impact: Option<f64>,
    pub simulated_score: Option<f64>,
}

impl From<&ScoreRecord> for HistoryRow {
    fn from(r: &ScoreRecord) -> Self {
        let (total_impact, score, simulated_impact, simulated_score) = match r.event {
            ScoreEvent::Baseline { total_impact, score } => (Some(total_impact), Some(score), None, None),
            ScoreEvent::Simulation { simulated_impact, simulated_score } => {
                (None, None, Some(simulated_impact), Some(simulated_score))
            }
        };
        Self {
            id: r.id,
            user_id: r.user_id.clone(),
            kind: r.kind(),
            timestamp: r.timestamp,
            total_impact,
            score,
            simulated_impact,
            simulated_score,
        }
    }
}

impl TryFrom<HistoryRow> for ScoreRecord {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        let event = match (row.kind, row.total_impact, row.score, row.simulated_impact, row.simulated_score) {
            (ScoreKind::Baseline, Some(total_impact), Some(score), None, None) => {
                ScoreEvent::Baseline { total_impact, score }
            }
            (ScoreKind::Simulation, None, None, Some(simulated_impact), Some(simulated_score)) => {
                ScoreEvent::Simulation { simulated_impact, simulated_score }
            }
            _ => {
                return Err(Error::StorageUnavailable(format!(
                    "malformed {} row {}: populated columns do not match its type",
                    row.kind.as_str(),
                    row.id
                )))
            }
        };
        Ok(Self { id: row.id, user_id: row.user_id, timestamp: row.timestamp, event })
    }
}

#[tonic::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Assigns the next id and a timestamp, stores the record, and returns it.
    async fn append(&self, record: NewScoreRecord) -> Result<ScoreRecord>;

    /// Every stored record, ascending by id.
    async fn list_all(&self) -> Result<Vec<ScoreRecord>>;
}

/// Id and clock state shared by the backends.
#[derive(Debug)]
struct Sequencer {
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Sequencer {
    fn starting_after(records: &[ScoreRecord]) -> Self {
        Self {
            next_id: records.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            last_timestamp: records.iter().map(|r| r.timestamp).max(),
        }
    }

    /// Stamps a record without consuming the id; call `commit` once stored.
    fn stamp(&self, record: NewScoreRecord) -> ScoreRecord {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        ScoreRecord { id: self.next_id, user_id: record.user_id, timestamp, event: record.event }
    }

    fn commit(&mut self, stored: &ScoreRecord) {
        self.next_id = stored.id + 1;
        self.last_timestamp = Some(stored.timestamp);
    }
}

/// Process-local backend; history is lost on restart.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    seq: Sequencer,
    records: Vec<ScoreRecord>,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(MemoryInner { seq: Sequencer::starting_after(&[]), records: Vec::new() }) }
    }
}

#[tonic::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: NewScoreRecord) -> Result<ScoreRecord> {
        let mut inner = self.inner.lock().await;
        let stored = inner.seq.stamp(record);
        inner.seq.commit(&stored);
        inner.records.push(stored.clone());
        debug!(id = stored.id, kind = stored.kind().as_str(), "history record appended");
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ScoreRecord>> {
        // Appends happen in id order under the lock, so the vec is already sorted.
        Ok(self.inner.lock().await.records.clone())
    }
}

/// Durable backend writing one JSON row per line to an append-only file.
///
/// The store assumes it is the only writer. An unterminated trailing line is
/// what a failed write leaves behind; it is skipped on read and cut off before
/// the next append.
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: Mutex<JsonlInner>,
}

#[derive(Debug)]
struct JsonlInner {
    seq: Sequencer,
    /// Byte length of the log up to and including its last complete line.
    committed_len: u64,
}

impl JsonlHistoryStore {
    /// Opens (or lazily creates) the log at `path`, resuming the id sequence
    /// after the highest id already stored.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let log = read_log(&path).await?;
        let seq = Sequencer::starting_after(&log.records);
        info!(path = %path.display(), records = log.records.len(), next_id = seq.next_id, "history log opened");
        Ok(Self { path, inner: Mutex::new(JsonlInner { seq, committed_len: log.committed_len }) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[tonic::async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, record: NewScoreRecord) -> Result<ScoreRecord> {
        let mut inner = self.inner.lock().await;
        let stored = inner.seq.stamp(record);

        let mut line = serde_json::to_vec(&HistoryRow::from(&stored)).map_err(Error::storage)?;
        line.push(b'\n');

        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                warn!(path = %self.path.display(), error = %e, "history log unavailable");
                Error::storage(e)
            })?;

        let len = f.metadata().await.map_err(Error::storage)?.len();
        if len > inner.committed_len {
            warn!(
                path = %self.path.display(),
                discarded_bytes = len - inner.committed_len,
                "dropping unterminated tail of history log"
            );
            f.set_len(inner.committed_len).await.map_err(Error::storage)?;
        }
        let start = len.min(inner.committed_len);

        let written = async {
            f.write_all(&line).await?;
            f.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "history write failed, rolling back");
            if let Err(rollback) = f.set_len(start).await {
                warn!(path = %self.path.display(), error = %rollback, "history rollback failed");
            }
            return Err(Error::storage(e));
        }

        inner.committed_len = start + line.len() as u64;
        inner.seq.commit(&stored);
        debug!(id = stored.id, kind = stored.kind().as_str(), "history record appended");
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ScoreRecord>> {
        Ok(read_log(&self.path).await?.records)
    }
}

#[derive(Debug, Default)]
struct LogContents {
    records: Vec<ScoreRecord>,
    committed_len: u64,
}

/// Parses every newline-terminated row. A complete row that fails to parse
/// fails the read; an unterminated tail is skipped with a warning.
async fn read_log(path: &Path) -> Result<LogContents> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LogContents::default()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "history log unreadable");
            return Err(Error::storage(e));
        }
    };

    let committed = text.rfind('\n').map_or(0, |i| i + 1);
    let (body, tail) = text.split_at(committed);
    if !tail.is_empty() {
        warn!(path = %path.display(), bytes = tail.len(), "skipping unterminated tail of history log");
    }

    let mut records = body
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| {
            let row: HistoryRow = serde_json::from_str(l).map_err(|e| {
                warn!(path = %path.display(), line = n + 1, error = %e, "corrupt history row");
                Error::storage(format!("line {}: {e}", n + 1))
            })?;
            ScoreRecord::try_from(row)
        })
        .collect::<Result<Vec<_>>>()?;
    records.sort_by_key(|r| r.id);
    Ok(LogContents { records, committed_len: committed as u64 })
}

/// Builds the configured backend.
pub async fn open_store(cfg: &HistoryConfig) -> Result<Arc<dyn HistoryStore>> {
    match cfg.backend {
        HistoryBackend::Memory => Ok(Arc::new(MemoryHistoryStore::new())),
        HistoryBackend::Jsonl => Ok(Arc::new(JsonlHistoryStore::open(&cfg.path).await?)),
    }
}

/// Baseline scores in insertion order; the input prediction strategies consume.
pub fn baseline_scores(records: &[ScoreRecord]) -> Vec<f64> {
    records.iter().filter_map(ScoreRecord::score).collect()
}

/// Aggregate view over the whole log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct HistorySummary {
    pub records: usize,
    pub baseline_records: usize,
    pub simulation_records: usize,
    /// Sum of `total_impact` over baseline records.
    pub total_impact: f64,
}

impl HistorySummary {
    pub fn from_records(records: &[ScoreRecord]) -> Self {
        records.iter().fold(Self::default(), |mut acc, r| {
            acc.records += 1;
            match r.event {
                ScoreEvent::Baseline { total_impact, .. } => {
                    acc.baseline_records += 1;
                    acc.total_impact += total_impact;
                }
                ScoreEvent::Simulation { .. } => acc.simulation_records += 1,
            }
            acc
        })
    }
}
