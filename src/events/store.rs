//! Durable record stores
//!
//! [`SqliteStore`] appends each record kind to its own table. Every row
//! carries the session id, subject id and the local/global timestamps taken
//! on enqueue. [`MemoryStore`] is an inspectable in-memory double used by
//! tests and dry runs.

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::{EventRecord, RecordKind, StampedRecord};
use crate::error::{RigError, RigResult};
use crate::hardware::Position;
use crate::phases::Phase;
use crate::settings::{Manipulation, RuleId};
use crate::trials::{Outcome, Side, Trial};

/// Per-session metadata persisted once at logger shutdown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub subject: String,
    pub subject_id: i64,
    pub started_at: String,
    pub config_json: String,
    pub code_json: String,
    pub sync_offsets: BTreeMap<String, f64>,
    pub notes: BTreeMap<String, String>,
}

/// Storage backend owned by the logger worker.
pub trait RecordStore: Send {
    /// Append one batch of a single kind, preserving order.
    fn append(&mut self, kind: RecordKind, batch: &[StampedRecord]) -> RigResult<()>;

    fn write_metadata(&mut self, meta: &SessionMetadata) -> RigResult<()>;

    fn close(&mut self) -> RigResult<()> {
        Ok(())
    }

    /// Trailing same-level run of the subject's stored trials.
    fn past_trials(&self, _subject_id: i64) -> RigResult<Vec<Trial>> {
        Ok(Vec::new())
    }

    /// Named position for a subject (e.g. "stim", "lick").
    fn position(&self, _subject_id: i64, _name: &str) -> RigResult<Option<Position>> {
        Ok(None)
    }
}

/// Keep only the trailing run of trials sharing the last trial's level.
pub fn trailing_level_run(mut trials: Vec<Trial>) -> Vec<Trial> {
    let Some(last) = trials.last().map(|t| t.level) else {
        return trials;
    };
    let from = trials
        .iter()
        .rposition(|t| t.level != last)
        .map(|i| i + 1)
        .unwrap_or(0);
    trials.split_off(from)
}

fn kind_mismatch(kind: RecordKind, record: &EventRecord) -> RigError {
    RigError::Persistence(format!(
        "{} record in {} batch",
        record.kind(),
        kind
    ))
}

// =============================================================================
// SQLITE
// =============================================================================

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
    session_id: String,
    subject_id: i64,
}

impl SqliteStore {
    /// Open (or create) the data file.
    pub fn open(path: &Path, session_id: &str, subject_id: i64) -> RigResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL so analysis can read while a session writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Self::with_connection(conn, session_id, subject_id)
    }

    pub fn open_in_memory(session_id: &str, subject_id: i64) -> RigResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, session_id, subject_id)
    }

    fn with_connection(conn: Connection, session_id: &str, subject_id: i64) -> RigResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn,
            session_id: session_id.to_string(),
            subject_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Rows stored for `kind` across all sessions.
    pub fn row_count(&self, kind: RecordKind) -> RigResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.name());
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn set_position(&self, subject_id: i64, name: &str, pos: Position) -> RigResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO positions (subject_id, name, x, y, z) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![subject_id, name, pos.x, pos.y, pos.z],
        )?;
        Ok(())
    }

    pub fn set_home(&self, pos: Position) -> RigResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO home_position (id, x, y, z) VALUES (0, ?1, ?2, ?3)",
            params![pos.x, pos.y, pos.z],
        )?;
        Ok(())
    }

    pub fn home(&self) -> RigResult<Option<Position>> {
        Ok(self
            .conn
            .query_row("SELECT x, y, z FROM home_position WHERE id = 0", [], |row| {
                Ok(Position {
                    x: row.get(0)?,
                    y: row.get(1)?,
                    z: row.get(2)?,
                })
            })
            .optional()?)
    }

    /// Sessions recorded in this file, oldest first.
    pub fn session_ids(&self) -> RigResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM sessions ORDER BY rowid")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn insert(&self, tx: &Transaction<'_>, kind: RecordKind, rec: &StampedRecord) -> RigResult<()> {
        let common = (&self.session_id, self.subject_id, rec.ts_local, rec.ts_global);
        match &rec.record {
            EventRecord::Trial(t) if kind == RecordKind::Trials => {
                tx.execute(
                    r#"INSERT INTO trials
                       (session_id, subject_id, ts_local, ts_global, idx, start_time, end_time,
                        dur, ratio, n_left, n_right, n_left_intended, n_right_intended, side,
                        condition, manipulation, outcome, reward, delay, rule, level,
                        reward_scale, draw_p)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                               ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"#,
                    params![
                        common.0,
                        common.1,
                        common.2,
                        common.3,
                        t.idx as i64,
                        t.start,
                        t.end,
                        t.dur,
                        t.ratio,
                        t.n_left.map(|n| n as i64),
                        t.n_right.map(|n| n as i64),
                        t.n_left_intended as i64,
                        t.n_right_intended as i64,
                        t.side.index() as i64,
                        t.condition,
                        t.manipulation.code(),
                        t.outcome.map(Outcome::code),
                        t.reward,
                        t.delay,
                        t.rule.code(),
                        t.level as i64,
                        t.reward_scale,
                        t.draw_p,
                    ],
                )?;
            }
            EventRecord::Stimulus { trial, side, time } if kind == RecordKind::TrialsTiming => {
                tx.execute(
                    "INSERT INTO trials_timing (session_id, subject_id, ts_local, ts_global, trial, side, time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![common.0, common.1, common.2, common.3, *trial as i64, side.index() as i64, time],
                )?;
            }
            EventRecord::Phase {
                trial,
                phase,
                start,
                end,
            } if kind == RecordKind::Phases => {
                tx.execute(
                    "INSERT INTO phases (session_id, subject_id, ts_local, ts_global, trial, phase, start_time, end_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![common.0, common.1, common.2, common.3, *trial as i64, phase.code(), start, end],
                )?;
            }
            EventRecord::Lick {
                trial,
                phase,
                side,
                ts,
            } if kind == RecordKind::Licks => {
                tx.execute(
                    "INSERT INTO licks (session_id, subject_id, ts_local, ts_global, trial, phase, side, ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        common.0,
                        common.1,
                        common.2,
                        common.3,
                        *trial as i64,
                        phase.code(),
                        side.index() as i64,
                        ts
                    ],
                )?;
            }
            EventRecord::Analog {
                licked,
                holding,
                moving,
            } if kind == RecordKind::Analog => {
                tx.execute(
                    "INSERT INTO analog (session_id, subject_id, ts_local, ts_global, lick_left, lick_right, holding, moving)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![common.0, common.1, common.2, common.3, licked[0], licked[1], holding, moving],
                )?;
            }
            EventRecord::Hardware {
                device,
                action,
                side,
                value,
            } if kind == RecordKind::Hardware => {
                tx.execute(
                    "INSERT INTO hardware (session_id, subject_id, ts_local, ts_global, device, action, side, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        common.0,
                        common.1,
                        common.2,
                        common.3,
                        device,
                        action,
                        side.map(|s| s.index() as i64),
                        value
                    ],
                )?;
            }
            other => return Err(kind_mismatch(kind, other)),
        }
        Ok(())
    }
}

impl RecordStore for SqliteStore {
    fn append(&mut self, kind: RecordKind, batch: &[StampedRecord]) -> RigResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for rec in batch {
            self.insert(&tx, kind, rec)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_metadata(&mut self, meta: &SessionMetadata) -> RigResult<()> {
        let sync_json = serde_json::to_string(&meta.sync_offsets)?;
        let notes_json = serde_json::to_string(&meta.notes)?;
        self.conn.execute(
            r#"INSERT OR REPLACE INTO sessions
               (id, subject, subject_id, started_at, ended_at, config_json, code_json, sync_json, notes_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                meta.session_id,
                meta.subject,
                meta.subject_id,
                meta.started_at,
                chrono::Utc::now().to_rfc3339(),
                meta.config_json,
                meta.code_json,
                sync_json,
                notes_json,
            ],
        )?;
        Ok(())
    }

    fn close(&mut self) -> RigResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn past_trials(&self, subject_id: i64) -> RigResult<Vec<Trial>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT idx, start_time, end_time, dur, ratio, n_left, n_right, n_left_intended,
                      n_right_intended, side, condition, manipulation, outcome, reward, delay,
                      rule, level, reward_scale, draw_p
               FROM trials WHERE subject_id = ?1 ORDER BY rowid"#,
        )?;
        let rows = stmt.query_map(params![subject_id], |row| {
            Ok(StoredTrialRow {
                idx: row.get(0)?,
                start: row.get(1)?,
                end: row.get(2)?,
                dur: row.get(3)?,
                ratio: row.get(4)?,
                n_left: row.get(5)?,
                n_right: row.get(6)?,
                n_left_intended: row.get(7)?,
                n_right_intended: row.get(8)?,
                side: row.get(9)?,
                condition: row.get(10)?,
                manipulation: row.get(11)?,
                outcome: row.get(12)?,
                reward: row.get(13)?,
                delay: row.get(14)?,
                rule: row.get(15)?,
                level: row.get(16)?,
                reward_scale: row.get(17)?,
                draw_p: row.get(18)?,
            })
        })?;

        let mut trials = Vec::new();
        for row in rows {
            trials.push(row?.into_trial()?);
        }
        Ok(trailing_level_run(trials))
    }

    fn position(&self, subject_id: i64, name: &str) -> RigResult<Option<Position>> {
        Ok(self
            .conn
            .query_row(
                "SELECT x, y, z FROM positions WHERE subject_id = ?1 AND name = ?2",
                params![subject_id, name],
                |row| {
                    Ok(Position {
                        x: row.get(0)?,
                        y: row.get(1)?,
                        z: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }
}

/// Raw trial row as stored.
struct StoredTrialRow {
    idx: i64,
    start: f64,
    end: Option<f64>,
    dur: f64,
    ratio: f64,
    n_left: Option<i64>,
    n_right: Option<i64>,
    n_left_intended: i64,
    n_right_intended: i64,
    side: i64,
    condition: Option<String>,
    manipulation: i64,
    outcome: Option<i64>,
    reward: bool,
    delay: f64,
    rule: i64,
    level: i64,
    reward_scale: f64,
    draw_p: f64,
}

impl StoredTrialRow {
    fn into_trial(self) -> RigResult<Trial> {
        let bad = |what: &str, v: i64| RigError::Persistence(format!("stored trial has bad {}: {}", what, v));
        let to_usize = |what: &str, v: i64| usize::try_from(v).map_err(|_| bad(what, v));
        Ok(Trial {
            idx: to_usize("idx", self.idx)?,
            start: self.start,
            dur: self.dur,
            ratio: self.ratio,
            n_left_intended: to_usize("n_left_intended", self.n_left_intended)?,
            n_right_intended: to_usize("n_right_intended", self.n_right_intended)?,
            side: usize::try_from(self.side)
                .ok()
                .and_then(Side::from_index)
                .ok_or_else(|| bad("side", self.side))?,
            condition: self.condition,
            manipulation: Manipulation::from_code(self.manipulation)
                .ok_or_else(|| bad("manipulation", self.manipulation))?,
            delay: self.delay,
            rule: RuleId::from_code(self.rule).ok_or_else(|| bad("rule", self.rule))?,
            level: to_usize("level", self.level)?,
            reward_scale: self.reward_scale,
            draw_p: self.draw_p,
            outcome: match self.outcome {
                Some(code) => Some(Outcome::from_code(code).ok_or_else(|| bad("outcome", code))?),
                None => None,
            },
            reward: self.reward,
            end: self.end,
            n_left: self.n_left.map(|n| to_usize("n_left", n)).transpose()?,
            n_right: self.n_right.map(|n| to_usize("n_right", n)).transpose()?,
        })
    }
}

/// Initialize the database schema
fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT NOT NULL,
            config_json TEXT,
            code_json TEXT,
            sync_json TEXT,
            notes_json TEXT
        );

        CREATE TABLE IF NOT EXISTS trials (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            idx INTEGER NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL,
            dur REAL NOT NULL,
            ratio REAL NOT NULL,
            n_left INTEGER,
            n_right INTEGER,
            n_left_intended INTEGER NOT NULL,
            n_right_intended INTEGER NOT NULL,
            side INTEGER NOT NULL,
            condition TEXT,
            manipulation INTEGER NOT NULL,
            outcome INTEGER,
            reward INTEGER NOT NULL,
            delay REAL NOT NULL,
            rule INTEGER NOT NULL,
            level INTEGER NOT NULL,
            reward_scale REAL NOT NULL,
            draw_p REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trials_timing (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            trial INTEGER NOT NULL,
            side INTEGER NOT NULL,
            time REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS phases (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            trial INTEGER NOT NULL,
            phase INTEGER NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licks (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            trial INTEGER NOT NULL,
            phase INTEGER NOT NULL,
            side INTEGER NOT NULL,
            ts REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analog (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            lick_left INTEGER NOT NULL,
            lick_right INTEGER NOT NULL,
            holding INTEGER NOT NULL,
            moving INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hardware (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            subject_id INTEGER NOT NULL,
            ts_local REAL NOT NULL,
            ts_global REAL NOT NULL,
            device TEXT NOT NULL,
            action TEXT NOT NULL,
            side INTEGER,
            value REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS positions (
            subject_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL,
            PRIMARY KEY (subject_id, name)
        );

        CREATE TABLE IF NOT EXISTS home_position (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_trials_subject ON trials(subject_id);
        CREATE INDEX IF NOT EXISTS idx_trials_session ON trials(session_id);
        CREATE INDEX IF NOT EXISTS idx_phases_session ON phases(session_id, trial);
        CREATE INDEX IF NOT EXISTS idx_licks_session ON licks(session_id, trial);
        "#,
    )?;
    Ok(())
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    rows: BTreeMap<RecordKind, Vec<StampedRecord>>,
    batches: BTreeMap<RecordKind, Vec<usize>>,
    metadata: Option<SessionMetadata>,
    failing: HashSet<RecordKind>,
    positions: BTreeMap<(i64, String), Position>,
    closed: bool,
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every append of `kind` fail.
    pub fn fail_kind(&self, kind: RecordKind) {
        self.lock().failing.insert(kind);
    }

    pub fn rows(&self, kind: RecordKind) -> Vec<StampedRecord> {
        self.lock().rows.get(&kind).cloned().unwrap_or_default()
    }

    /// Sizes of the batches appended for `kind`, in order.
    pub fn batches(&self, kind: RecordKind) -> Vec<usize> {
        self.lock().batches.get(&kind).cloned().unwrap_or_default()
    }

    pub fn metadata(&self) -> Option<SessionMetadata> {
        self.lock().metadata.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn set_position(&self, subject_id: i64, name: &str, pos: Position) {
        self.lock().positions.insert((subject_id, name.to_string()), pos);
    }

    /// Finalized trials stored so far.
    pub fn trials(&self) -> Vec<Trial> {
        self.rows(RecordKind::Trials)
            .into_iter()
            .filter_map(|r| match r.record {
                EventRecord::Trial(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Phase sequence per trial, in stored order.
    pub fn phases_by_trial(&self) -> BTreeMap<usize, Vec<Phase>> {
        let mut out: BTreeMap<usize, Vec<Phase>> = BTreeMap::new();
        for r in self.rows(RecordKind::Phases) {
            if let EventRecord::Phase { trial, phase, .. } = r.record {
                out.entry(trial).or_default().push(phase);
            }
        }
        out
    }
}

impl RecordStore for MemoryStore {
    fn append(&mut self, kind: RecordKind, batch: &[StampedRecord]) -> RigResult<()> {
        let mut inner = self.lock();
        if inner.failing.contains(&kind) {
            return Err(RigError::Persistence(format!("{} table unavailable", kind)));
        }
        if let Some(rec) = batch.iter().find(|r| r.record.kind() != kind) {
            return Err(kind_mismatch(kind, &rec.record));
        }
        inner.rows.entry(kind).or_default().extend_from_slice(batch);
        inner.batches.entry(kind).or_default().push(batch.len());
        Ok(())
    }

    fn write_metadata(&mut self, meta: &SessionMetadata) -> RigResult<()> {
        self.lock().metadata = Some(meta.clone());
        Ok(())
    }

    fn close(&mut self) -> RigResult<()> {
        self.lock().closed = true;
        Ok(())
    }

    fn past_trials(&self, _subject_id: i64) -> RigResult<Vec<Trial>> {
        Ok(trailing_level_run(self.trials()))
    }

    fn position(&self, subject_id: i64, name: &str) -> RigResult<Option<Position>> {
        Ok(self.lock().positions.get(&(subject_id, name.to_string())).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trials::finished_trial;

    fn stamped(record: EventRecord) -> StampedRecord {
        StampedRecord {
            ts_local: 1.0,
            ts_global: 1_700_000_000.0,
            record,
        }
    }

    #[test]
    fn test_trailing_level_run() {
        let trials = vec![
            finished_trial(0, Side::Left, Outcome::Correct, 1),
            finished_trial(1, Side::Left, Outcome::Correct, 2),
            finished_trial(2, Side::Right, Outcome::Null, 1),
            finished_trial(3, Side::Right, Outcome::Correct, 1),
        ];
        let run = trailing_level_run(trials);
        assert_eq!(run.iter().map(|t| t.idx).collect::<Vec<_>>(), vec![2, 3]);
        assert!(trailing_level_run(Vec::new()).is_empty());
    }

    #[test]
    fn test_sqlite_trials_round_trip_past_run() {
        let mut store = SqliteStore::open_in_memory("s1", 7).unwrap();
        let batch: Vec<StampedRecord> = [(0, 3), (1, 4), (2, 4)]
            .into_iter()
            .map(|(i, lvl)| stamped(EventRecord::Trial(finished_trial(i, Side::Right, Outcome::Correct, lvl))))
            .collect();
        store.append(RecordKind::Trials, &batch).unwrap();

        assert_eq!(store.row_count(RecordKind::Trials).unwrap(), 3);
        let past = store.past_trials(7).unwrap();
        assert_eq!(past.len(), 2);
        assert_eq!(past[0].level, 4);
        assert_eq!(past[1].outcome, Some(Outcome::Correct));
        assert_eq!(past[1].side, Side::Right);
        assert!(store.past_trials(8).unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_rejects_mixed_batch() {
        let mut store = SqliteStore::open_in_memory("s1", 1).unwrap();
        let batch = vec![stamped(EventRecord::Analog {
            licked: [true, false],
            holding: false,
            moving: true,
        })];
        assert!(store.append(RecordKind::Licks, &batch).is_err());
        assert_eq!(store.row_count(RecordKind::Licks).unwrap(), 0);
        store.append(RecordKind::Analog, &batch).unwrap();
        assert_eq!(store.row_count(RecordKind::Analog).unwrap(), 1);
    }

    #[test]
    fn test_sqlite_positions_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.sqlite");
        let mut store = SqliteStore::open(&path, "abc", 3).unwrap();

        let stim = Position { x: 1.0, y: 2.0, z: 3.0 };
        store.set_position(3, "stim", stim).unwrap();
        store.set_home(Position { x: 0.0, y: 0.0, z: 9.0 }).unwrap();
        assert_eq!(store.position(3, "stim").unwrap(), Some(stim));
        assert_eq!(store.position(3, "lick").unwrap(), None);
        assert_eq!(store.home().unwrap().map(|p| p.z), Some(9.0));

        let meta = SessionMetadata {
            session_id: "abc".into(),
            subject: "m3".into(),
            subject_id: 3,
            started_at: "2026-01-01T00:00:00Z".into(),
            ..Default::default()
        };
        store.write_metadata(&meta).unwrap();
        store.close().unwrap();
        assert_eq!(store.session_ids().unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let mut store = MemoryStore::new();
        store.fail_kind(RecordKind::Phases);
        let rec = stamped(EventRecord::Phase {
            trial: 0,
            phase: Phase::Intro,
            start: 0.0,
            end: 1.0,
        });
        assert!(matches!(
            store.append(RecordKind::Phases, &[rec]),
            Err(RigError::Persistence(_))
        ));
        assert!(store.rows(RecordKind::Phases).is_empty());
    }
}
