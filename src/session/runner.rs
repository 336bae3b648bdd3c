//! Session run loop
//!
//! Wires the store, event logger, sensor poller, trial handler and phase
//! engine together, runs trials until killed or the trial limit is reached,
//! then shuts everything down in order: engine, poller, logger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::snapshot::code_snapshot;
use super::summary::SessionSummary;
use crate::clock::Clock;
use crate::error::{RigError, RigResult};
use crate::events::{EventLogger, LoggerConfig, RecordStore, SessionMetadata, SqliteStore, SyncGate};
use crate::hardware::{Hardware, Position, SensorPoller, SensorSource};
use crate::phases::{EngineConfig, PhaseEngine, SessionControl};
use crate::settings::RigConfig;
use crate::trials::{HandlerConfig, LevelState, TrialHandler};

/// Manipulator position loaded at session start
pub const STIM_POSITION: &str = "stim";

/// Fresh session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One behavioral session against a rig.
pub struct Session<H: Hardware> {
    id: String,
    config: RigConfig,
    engine: PhaseEngine<H>,
    handler: TrialHandler,
    logger: EventLogger,
    gate: Arc<SyncGate>,
    clock: Arc<dyn Clock>,
    control: SessionControl,
    stim_position: Option<Position>,
    summary_path: Option<PathBuf>,
}

impl<H: Hardware> Session<H> {
    /// Open the configured SQLite data file and build a session on it. The
    /// summary is written next to the data file.
    pub fn open_sqlite(config: RigConfig, hw: H, clock: Arc<dyn Clock>, control: SessionControl) -> RigResult<Self> {
        let id = new_session_id();
        let data_file = PathBuf::from(&config.session.data_file);
        let store = SqliteStore::open(&data_file, &id, config.session.subject_id)?;
        let summary_path = data_file.with_file_name(format!("{}_summary.json", id));
        let mut session = Self::new(id, config, hw, Box::new(store), clock, control)?;
        session.summary_path = Some(summary_path);
        Ok(session)
    }

    /// Build a session on `store`. Past trials and the stim position are read
    /// from the store before it is handed to the logger.
    pub fn new(
        id: String,
        config: RigConfig,
        hw: H,
        store: Box<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        control: SessionControl,
    ) -> RigResult<Self> {
        config.validate()?;
        let subject_id = config.session.subject_id;
        let past = store.past_trials(subject_id)?;
        let stim_position = store.position(subject_id, STIM_POSITION)?;
        info!(
            "Session {} for {} ({} past trials at the last level)",
            id,
            config.session.subject,
            past.len()
        );

        let code_root = config.session.code_root.as_deref().map(Path::new);
        let metadata = SessionMetadata {
            session_id: id.clone(),
            subject: config.session.subject.clone(),
            subject_id,
            started_at: chrono::Utc::now().to_rfc3339(),
            config_json: config.to_json()?,
            code_json: code_snapshot(code_root)?,
            sync_offsets: BTreeMap::new(),
            notes: BTreeMap::new(),
        };

        let table = config.level_table()?;
        let session_manipulation = config.session_manipulation()?;

        let gate = Arc::new(SyncGate::new());
        let logger_config = LoggerConfig::from_settings(&config.logger, &config.session.dump_dir)?;
        let logger = EventLogger::start(store, logger_config, metadata, Arc::clone(&gate), Arc::clone(&clock))?;

        let levels = LevelState::new(table, config.trial.start_level, past);
        let handler = TrialHandler::new(
            HandlerConfig {
                params: config.trial.clone(),
                condition: config.session.condition.clone(),
                session_manipulation,
                seed: config.session.seed,
            },
            levels,
            logger.handle(),
            Arc::clone(&clock),
        );
        let engine = PhaseEngine::new(
            EngineConfig {
                settings: config.engine.clone(),
                tick_interval: config.session.tick_interval,
                seed: config.session.seed.map(|s| s.wrapping_add(1)),
            },
            hw,
            logger.handle(),
            Arc::clone(&clock),
            control.clone(),
        )?;

        Ok(Self {
            id,
            config,
            engine,
            handler,
            logger,
            gate,
            clock,
            control,
            stim_position,
            summary_path: None,
        })
    }

    /// Sample `source` on a background poller instead of polling the rig
    /// from the control loop.
    pub fn with_sensor_source(mut self, source: Box<dyn SensorSource>) -> RigResult<Self> {
        let poller = SensorPoller::start(
            source,
            self.config.engine.sensor_rate_hz,
            self.logger.handle(),
            Arc::clone(&self.gate),
            Arc::clone(&self.clock),
        )?;
        self.engine = self.engine.with_poller(poller);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn handler(&self) -> &TrialHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut TrialHandler {
        &mut self.handler
    }

    /// Run until killed or out of trials, then shut down and summarize.
    ///
    /// Precondition and invariant failures stop the session; the logger is
    /// still drained and closed before the error is returned.
    pub fn run(mut self) -> RigResult<SessionSummary> {
        let started = self.clock.now();
        self.gate.open("session", self.clock.as_ref());
        if let Some(pos) = self.stim_position {
            self.engine.move_manipulator(pos);
        } else {
            warn!("No '{}' position stored for subject {}", STIM_POSITION, self.config.session.subject);
        }

        let result = self.run_trials();
        let closed = self.engine.close();

        let mut notes = BTreeMap::new();
        notes.insert("trials".to_string(), self.handler.trials().len().to_string());
        notes.insert("final_level".to_string(), self.handler.level().to_string());
        if let Err(e) = &result {
            error!("Session {} stopped: {}", self.id, e);
            notes.insert("error".to_string(), e.to_string());
        }
        if let Err(e) = &closed {
            warn!("Engine shutdown failed: {}", e);
            notes.insert("shutdown_error".to_string(), e.to_string());
        }
        let report = self.logger.end(notes)?;
        result?;
        closed?;

        let summary = SessionSummary::from_trials(
            &self.id,
            &self.config.session.subject,
            self.handler.trials(),
            self.handler.level(),
            self.clock.now() - started,
            &report,
        )
        .with_history(self.handler.history());
        if let Some(path) = &self.summary_path {
            summary.write_to_file(path)?;
            info!("Session summary written to {}", path.display());
        }
        Ok(summary)
    }

    fn run_trials(&mut self) -> RigResult<()> {
        loop {
            if self.control.is_killed() {
                info!("Session killed after {} trials", self.handler.trials().len());
                return Ok(());
            }
            if let Some(max) = self.config.session.max_trials
                && self.handler.trials().len() >= max
            {
                info!("Reached {} trials", max);
                return Ok(());
            }
            let trial = self.engine.run_trial(&mut self.handler)?;
            let outcome = trial
                .outcome
                .ok_or_else(|| RigError::Invariant(format!("trial {} ended without an outcome", trial.idx)))?;
            info!(
                "Trial {:>4} level {} side {} -> {}{}",
                trial.idx,
                trial.level,
                trial.side,
                outcome.name(),
                if trial.reward { " (rewarded)" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{MemoryStore, RecordKind};
    use crate::hardware::{HwCall, SimulatedRig, SubjectModel};
    use crate::phases::Phase;

    fn config(dir: &Path, trials: usize) -> RigConfig {
        let mut config = RigConfig::default();
        config.session.subject = "m1".into();
        config.session.subject_id = 7;
        config.session.dump_dir = dir.join("dumps").to_string_lossy().to_string();
        config.session.tick_interval = 0.01;
        config.session.seed = Some(21);
        config.session.max_trials = Some(trials);
        config
    }

    fn sim(clock: &ManualClock) -> SimulatedRig {
        let model = SubjectModel {
            early_prob: 0.0,
            ..SubjectModel::default()
        };
        SimulatedRig::with_subject(Arc::new(clock.clone()), model, 4)
    }

    #[test]
    fn test_runs_to_trial_limit() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let store = MemoryStore::new();
        store.set_position(7, STIM_POSITION, Position::new(1.0, 2.0, 3.0));
        let rig = sim(&clock);

        let session = Session::new(
            new_session_id(),
            config(dir.path(), 5),
            rig.clone(),
            Box::new(store.clone()),
            Arc::new(clock.clone()),
            SessionControl::new(),
        )
        .unwrap();
        let summary = session.run().unwrap();

        assert_eq!(summary.trials, 5);
        assert!(summary.recent_valid.is_some());
        assert_eq!(store.trials().len(), 5);
        assert!(store.is_closed());
        let meta = store.metadata().unwrap();
        assert_eq!(meta.subject_id, 7);
        assert!(meta.sync_offsets.contains_key("logger"));
        assert_eq!(meta.notes["trials"], "5");

        // Every trial ends in ITI then END
        for phases in store.phases_by_trial().values() {
            assert_eq!(phases.first(), Some(&Phase::Intro));
            assert_eq!(&phases[phases.len() - 2..], &[Phase::Iti, Phase::End]);
        }
        assert_eq!(rig.calls().first(), Some(&HwCall::Goto(Position::new(1.0, 2.0, 3.0))));
        assert!(!store.rows(RecordKind::Licks).is_empty());
    }

    #[test]
    fn test_kill_before_start_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let store = MemoryStore::new();
        let control = SessionControl::new();
        control.kill();
        let session = Session::new(
            new_session_id(),
            config(dir.path(), 5),
            sim(&clock),
            Box::new(store.clone()),
            Arc::new(clock),
            control,
        )
        .unwrap();
        let summary = session.run().unwrap();
        assert_eq!(summary.trials, 0);
        assert!(store.rows(RecordKind::Phases).is_empty());
        assert!(store.metadata().is_some());
    }

    #[test]
    fn test_resumes_from_stored_level() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let store = MemoryStore::new();

        let first = Session::new(
            new_session_id(),
            config(dir.path(), 2),
            sim(&clock),
            Box::new(store.clone()),
            Arc::new(clock.clone()),
            SessionControl::new(),
        )
        .unwrap();
        let first_level = first.run().unwrap().final_level;

        let second = Session::new(
            new_session_id(),
            config(dir.path(), 1),
            sim(&clock),
            Box::new(store.clone()),
            Arc::new(clock.clone()),
            SessionControl::new(),
        )
        .unwrap();
        assert_eq!(second.handler().level(), first_level);
        second.run().unwrap();
    }

    #[test]
    fn test_sqlite_session_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let mut cfg = config(dir.path(), 2);
        cfg.session.data_file = dir.path().join("data/data.sqlite").to_string_lossy().to_string();

        let session = Session::open_sqlite(cfg, sim(&clock), Arc::new(clock.clone()), SessionControl::new()).unwrap();
        let id = session.id().to_string();
        let summary = session.run().unwrap();
        assert_eq!(summary.trials, 2);

        let path = dir.path().join("data").join(format!("{}_summary.json", id));
        assert!(path.exists());
        let store = SqliteStore::open(&dir.path().join("data/data.sqlite"), "reader", 7).unwrap();
        assert_eq!(store.row_count(RecordKind::Trials).unwrap(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let mut cfg = config(dir.path(), 1);
        cfg.session.manipulation = "no_such_preset".into();
        let result = Session::new(
            new_session_id(),
            cfg,
            sim(&clock),
            Box::new(MemoryStore::new()),
            Arc::new(clock),
            SessionControl::new(),
        );
        assert!(result.is_err());
    }
}
