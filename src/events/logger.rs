//! Event logger
//!
//! Producers enqueue records through a cloneable [`LoggerHandle`] without
//! blocking. A single worker thread drains the queue, buffers records per
//! kind and flushes each buffer to the store once it reaches its threshold.
//! A failed flush is logged and the batch is written to a JSON crash dump;
//! the worker keeps going.
//!
//! Ordering: FIFO within a kind, none across kinds.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

use super::store::{RecordStore, SessionMetadata};
use super::sync::SyncGate;
use super::types::{EventRecord, RecordKind, StampedRecord};
use crate::clock::{Clock, global_now};
use crate::error::{RigError, RigResult};
use crate::settings::LoggerSettings;

/// Buffering thresholds and crash dump location.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub flush_threshold: usize,
    pub forced_flush: BTreeMap<RecordKind, usize>,
    pub dump_dir: PathBuf,
}

impl LoggerConfig {
    pub fn from_settings(settings: &LoggerSettings, dump_dir: impl Into<PathBuf>) -> RigResult<Self> {
        let mut forced_flush = BTreeMap::new();
        for (name, n) in &settings.forced_flush {
            let kind = RecordKind::from_name(name)
                .ok_or_else(|| RigError::Config(format!("unknown record kind '{}'", name)))?;
            forced_flush.insert(kind, (*n).max(1));
        }
        Ok(Self {
            flush_threshold: settings.flush_threshold.max(1),
            forced_flush,
            dump_dir: dump_dir.into(),
        })
    }

    /// Buffer length at which `kind` is flushed.
    pub fn threshold(&self, kind: RecordKind) -> usize {
        match self.forced_flush.get(&kind) {
            Some(n) => (*n).min(self.flush_threshold),
            None => self.flush_threshold,
        }
    }
}

enum LoggerMsg {
    Record(StampedRecord),
    End(BTreeMap<String, String>),
}

/// What the worker did, returned by [`EventLogger::end`].
#[derive(Debug, Clone, Default)]
pub struct LoggerReport {
    pub rows_written: BTreeMap<RecordKind, usize>,
    pub rows_dumped: usize,
    pub crash_dumps: Vec<PathBuf>,
    /// Records still buffered when shutdown began
    pub final_flush: usize,
    pub dropped_after_shutdown: u64,
    pub metadata_written: bool,
}

impl LoggerReport {
    pub fn total_written(&self) -> usize {
        self.rows_written.values().sum()
    }
}

/// Cloneable producer side of the logger.
#[derive(Clone)]
pub struct LoggerHandle {
    tx: Sender<LoggerMsg>,
    shutdown: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl LoggerHandle {
    /// Enqueue a record. Silently dropped once shutdown has been requested.
    pub fn write(&self, record: EventRecord) {
        if self.shutdown.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let stamped = StampedRecord {
            ts_local: self.clock.now(),
            ts_global: global_now(),
            record,
        };
        if self.tx.send(LoggerMsg::Record(stamped)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Records refused since shutdown.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owner of the worker thread.
pub struct EventLogger {
    handle: LoggerHandle,
    gate: Arc<SyncGate>,
    worker: Option<thread::JoinHandle<LoggerReport>>,
}

impl EventLogger {
    /// Spawn the worker. It waits on `gate` before consuming records.
    ///
    /// `metadata` carries everything known at startup; sync offsets and notes
    /// are filled in at shutdown.
    pub fn start(
        store: Box<dyn RecordStore>,
        config: LoggerConfig,
        metadata: SessionMetadata,
        gate: Arc<SyncGate>,
        clock: Arc<dyn Clock>,
    ) -> RigResult<Self> {
        let (tx, rx) = unbounded();
        let handle = LoggerHandle {
            tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            clock: Arc::clone(&clock),
        };

        let worker_gate = Arc::clone(&gate);
        let worker = thread::Builder::new()
            .name("event-logger".to_string())
            .spawn(move || {
                let stamp = worker_gate.wait("logger", clock.as_ref());
                debug!("Logger synced at {:.6}", stamp);
                Worker::new(store, config, metadata).run(rx, &worker_gate)
            })?;

        Ok(Self {
            handle,
            gate,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> LoggerHandle {
        self.handle.clone()
    }

    /// Request shutdown, drain the queue, flush every buffer, persist the
    /// session metadata with `notes`, and close the store.
    pub fn end(mut self, notes: BTreeMap<String, String>) -> RigResult<LoggerReport> {
        self.handle.shutdown.store(true, Ordering::SeqCst);
        if !self.gate.is_open() {
            warn!("Logger ending before session start; releasing sync gate");
            self.gate.open("logger_end", self.handle.clock.as_ref());
        }
        // Worker only exits on End or disconnect, so a failed send means it is gone
        let _ = self.handle.tx.send(LoggerMsg::End(notes));

        let worker = self
            .worker
            .take()
            .ok_or_else(|| RigError::Invariant("logger worker already joined".into()))?;
        let mut report = worker
            .join()
            .map_err(|_| RigError::Invariant("logger worker panicked".into()))?;
        report.dropped_after_shutdown = self.handle.dropped();
        info!(
            "Logger closed: {} rows written, {} rows in {} crash dumps",
            report.total_written(),
            report.rows_dumped,
            report.crash_dumps.len()
        );
        Ok(report)
    }
}

struct Worker {
    store: Box<dyn RecordStore>,
    config: LoggerConfig,
    metadata: SessionMetadata,
    buffers: BTreeMap<RecordKind, Vec<StampedRecord>>,
    report: LoggerReport,
}

impl Worker {
    fn new(store: Box<dyn RecordStore>, config: LoggerConfig, metadata: SessionMetadata) -> Self {
        Self {
            store,
            config,
            metadata,
            buffers: BTreeMap::new(),
            report: LoggerReport::default(),
        }
    }

    fn run(mut self, rx: Receiver<LoggerMsg>, gate: &SyncGate) -> LoggerReport {
        let notes = loop {
            match rx.recv() {
                Ok(LoggerMsg::Record(rec)) => self.push(rec),
                Ok(LoggerMsg::End(notes)) => {
                    info!("Logger final flush: {} items remain in queue", rx.len());
                    while let Ok(msg) = rx.try_recv() {
                        if let LoggerMsg::Record(rec) = msg {
                            self.push(rec);
                        }
                    }
                    break notes;
                }
                Err(_) => break BTreeMap::new(),
            }
        };

        self.report.final_flush = self.buffers.values().map(Vec::len).sum();
        let kinds: Vec<RecordKind> = self.buffers.keys().copied().collect();
        for kind in kinds {
            self.flush(kind);
        }

        self.metadata.sync_offsets = gate.offsets();
        self.metadata.notes = notes;
        match self.store.write_metadata(&self.metadata) {
            Ok(()) => self.report.metadata_written = true,
            Err(e) => {
                error!("Failed to save session metadata: {}", e);
                match write_crash_dump(&self.config.dump_dir, "metadata", &self.metadata) {
                    Ok(path) => {
                        warn!("Session metadata backed up to {}", path.display());
                        self.report.crash_dumps.push(path);
                    }
                    Err(e) => error!("Metadata crash dump failed: {}", e),
                }
            }
        }
        if let Err(e) = self.store.close() {
            error!("Failed to close store: {}", e);
        }
        self.report
    }

    fn push(&mut self, rec: StampedRecord) {
        let kind = rec.record.kind();
        let threshold = self.config.threshold(kind);
        let buf = self.buffers.entry(kind).or_default();
        buf.push(rec);
        if buf.len() >= threshold {
            self.flush(kind);
        }
    }

    fn flush(&mut self, kind: RecordKind) {
        let Some(buf) = self.buffers.get_mut(&kind) else {
            return;
        };
        if buf.is_empty() {
            return;
        }
        let batch = std::mem::take(buf);

        match self.store.append(kind, &batch) {
            Ok(()) => {
                *self.report.rows_written.entry(kind).or_default() += batch.len();
            }
            Err(e) => {
                error!("Failure to save {} records of kind '{}': {}", batch.len(), kind, e);
                let dump = CrashDump {
                    kind,
                    session_id: &self.metadata.session_id,
                    subject_id: self.metadata.subject_id,
                    records: &batch,
                };
                match write_crash_dump(&self.config.dump_dir, kind.name(), &dump) {
                    Ok(path) => {
                        warn!("Crash dump written: {}", path.display());
                        self.report.rows_dumped += batch.len();
                        self.report.crash_dumps.push(path);
                    }
                    Err(e) => error!("Crash dump for '{}' failed, {} records lost: {}", kind, batch.len(), e),
                }
            }
        }
    }
}

#[derive(serde::Serialize)]
struct CrashDump<'a> {
    kind: RecordKind,
    session_id: &'a str,
    subject_id: i64,
    records: &'a [StampedRecord],
}

/// Write `value` as JSON to `crashdump_{label}_{micros}.json` under `dir`.
fn write_crash_dump<T: serde::Serialize>(dir: &Path, label: &str, value: &T) -> RigResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let mut micros = chrono::Utc::now().timestamp_micros();
    let mut path = dir.join(format!("crashdump_{}_{}.json", label, micros));
    while path.exists() {
        micros += 1;
        path = dir.join(format!("crashdump_{}_{}.json", label, micros));
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Logger over a memory store with its sync gate already open.
#[cfg(test)]
pub(crate) fn memory_logger(
    store: &super::store::MemoryStore,
    dump_dir: &Path,
    clock: Arc<dyn Clock>,
) -> EventLogger {
    let gate = Arc::new(SyncGate::new());
    let config = LoggerConfig::from_settings(&LoggerSettings::default(), dump_dir).unwrap();
    let logger = EventLogger::start(
        Box::new(store.clone()),
        config,
        SessionMetadata::default(),
        Arc::clone(&gate),
        Arc::clone(&clock),
    )
    .unwrap();
    gate.open("session", clock.as_ref());
    logger
}
