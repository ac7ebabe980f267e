//! Per-requester lookup history.
//!
//! Records are append-only. [`HistoryLedger::submit`] hands a record to a
//! single writer task so resolution never waits on the journal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{HistoryError, HistoryRecord, RequesterId, Resolution, ResultSummary, VariantIdentifier};
use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

pub const HISTORY_FILE: &str = "history.jsonl";

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError>;

    /// All records for `requester`, in no particular order.
    async fn list_for(&self, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError>;
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<RequesterId, Vec<HistoryRecord>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records
            .write()
            .await
            .entry(record.requester.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn list_for(&self, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self
            .records
            .read()
            .await
            .get(requester)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSON object per line in `<dir>/history.jsonl`.
pub struct JsonlHistoryStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlHistoryStore {
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        create_dir_all(dir)?;
        let path = dir.join(HISTORY_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| HistoryError(format!("serialize failed: {e}")))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| HistoryError("journal lock poisoned".into()))?;
        writeln!(file, "{}", line).map_err(|e| HistoryError(format!("write failed: {e}")))?;
        file.flush()
            .map_err(|e| HistoryError(format!("flush failed: {e}")))?;
        Ok(())
    }

    async fn list_for(&self, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError> {
        let path = self.path.clone();
        let requester = requester.clone();
        tokio::task::spawn_blocking(move || read_journal(&path, &requester))
            .await
            .map_err(|e| HistoryError(format!("journal read task failed: {e}")))?
    }
}

/// Read every well-formed record for `requester` from the journal at `path`.
fn read_journal(path: &Path, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HistoryError(format!("read failed: {e}"))),
    };

    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) if record.requester == *requester => records.push(record),
            Ok(_) => {}
            Err(e) => warn!(
                "Skipping malformed history line {} in {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(records)
}

enum Command {
    Append(HistoryRecord),
    Flush(oneshot::Sender<()>),
}

/// Front for a [`HistoryStore`] that owns `seq` assignment and ordering.
#[derive(Clone)]
pub struct HistoryLedger {
    store: Arc<dyn HistoryStore>,
    tx: mpsc::UnboundedSender<Command>,
    next_seq: Arc<AtomicU64>,
}

impl HistoryLedger {
    /// Start the writer task. Must be called inside a Tokio runtime; the
    /// task exits once every clone of the ledger is dropped.
    pub fn spawn(store: Arc<dyn HistoryStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let writer = store.clone();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Append(record) => {
                        let (requester, id) = (record.requester.clone(), record.id.clone());
                        if let Err(e) = writer.append(record).await {
                            warn!("History write for {} ({}) failed: {}", requester, id, e);
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("History writer stopped");
        });

        Self {
            store,
            tx,
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn make_record(
        &self,
        requester: &RequesterId,
        id: &VariantIdentifier,
        resolution: &Resolution,
        when: DateTime<Utc>,
    ) -> HistoryRecord {
        HistoryRecord {
            requester: requester.clone(),
            id: id.clone(),
            summary: ResultSummary::from_report(
                &resolution.report,
                resolution.cache_hit,
                resolution.degraded,
            ),
            recorded_at: when,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Append synchronously, surfacing store failures.
    pub async fn record(
        &self,
        requester: &RequesterId,
        id: &VariantIdentifier,
        resolution: &Resolution,
        when: DateTime<Utc>,
    ) -> Result<(), HistoryError> {
        let record = self.make_record(requester, id, resolution, when);
        self.store.append(record).await
    }

    /// Queue a record for the writer task. Never blocks, never fails.
    pub fn submit(
        &self,
        requester: &RequesterId,
        id: &VariantIdentifier,
        resolution: &Resolution,
        when: DateTime<Utc>,
    ) {
        let record = self.make_record(requester, id, resolution, when);
        if self.tx.send(Command::Append(record)).is_err() {
            warn!("History writer is gone; dropping record for {}", requester);
        }
    }

    /// Wait until everything submitted before this call has been written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Newest first. Equal timestamps are ordered by submission, latest first.
    pub async fn list_for(&self, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut records = self.store.list_for(requester).await?;
        records.sort_by(|a, b| (b.recorded_at, b.seq).cmp(&(a.recorded_at, a.seq)));
        Ok(records)
    }

    /// Records from the `window` before `now`, newest first.
    pub async fn list_recent(
        &self,
        requester: &RequesterId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w));

        let mut records = self.list_for(requester).await?;
        if let Some(cutoff) = cutoff {
            records.retain(|r| r.recorded_at >= cutoff);
        }
        Ok(records)
    }
}
