//! Background sensor poller
//!
//! Samples a [`SensorSource`] at a fixed rate on its own thread, logs every
//! sample as an `analog` record and latches licks until the engine takes
//! them. The engine never waits on the poller: an empty latch just means no
//! licks this tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::SensorReading;
use crate::clock::Clock;
use crate::error::{HardwareError, RigError, RigResult};
use crate::events::{EventRecord, LoggerHandle, SyncGate};

/// How often a poller waiting on the start gate checks for stop.
const GATE_POLL: Duration = Duration::from_millis(20);

/// Raw sensor access, owned by the poller thread.
pub trait SensorSource: Send {
    fn read(&mut self) -> Result<SensorReading, HardwareError>;
}

pub struct SensorPoller {
    latch: Arc<Mutex<SensorReading>>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<u64>>,
}

impl SensorPoller {
    /// Spawn the poller. It waits on `gate` (as "sensor") before sampling.
    pub fn start(
        mut source: Box<dyn SensorSource>,
        rate_hz: f64,
        logger: LoggerHandle,
        gate: Arc<SyncGate>,
        clock: Arc<dyn Clock>,
    ) -> RigResult<Self> {
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(RigError::Precondition(format!("sensor rate must be positive, got {}", rate_hz)));
        }
        let period = 1.0 / rate_hz;
        let latch = Arc::new(Mutex::new(SensorReading::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker_latch = Arc::clone(&latch);
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("sensor-poller".to_string())
            .spawn(move || {
                let Some(stamp) = wait_for_gate(&gate, &worker_stop, clock.as_ref()) else {
                    debug!("Sensor poller stopped before the session started");
                    return 0;
                };
                debug!("Sensor poller synced at {:.6}", stamp);
                let mut samples = 0u64;
                while !worker_stop.load(Ordering::SeqCst) {
                    match source.read() {
                        Ok(reading) => {
                            samples += 1;
                            logger.write(EventRecord::Analog {
                                licked: reading.licked,
                                holding: reading.holding,
                                moving: reading.moving,
                            });
                            worker_latch
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .merge(reading);
                        }
                        Err(e) => debug!("Sensor read failed: {}", e),
                    }
                    clock.sleep(period);
                }
                samples
            })?;

        Ok(Self {
            latch,
            stop,
            worker: Some(worker),
        })
    }

    /// Latched state since the last call; lick flags are cleared.
    pub fn take(&self) -> SensorReading {
        let mut latch = self.latch.lock().unwrap_or_else(PoisonError::into_inner);
        let reading = *latch;
        latch.licked = [false, false];
        reading
    }

    /// Stop sampling and join. Returns the number of samples taken.
    pub fn stop(mut self) -> RigResult<u64> {
        self.stop.store(true, Ordering::SeqCst);
        let worker = self
            .worker
            .take()
            .ok_or_else(|| RigError::Invariant("sensor poller already joined".into()))?;
        let samples = worker
            .join()
            .map_err(|_| RigError::Invariant("sensor poller panicked".into()))?;
        info!("Sensor poller stopped after {} samples", samples);
        Ok(samples)
    }
}

/// Wait on the start gate as "sensor". None if stopped first.
fn wait_for_gate(gate: &SyncGate, stop: &AtomicBool, clock: &dyn Clock) -> Option<f64> {
    while !stop.load(Ordering::SeqCst) {
        if let Some(stamp) = gate.wait_timeout("sensor", clock, GATE_POLL) {
            return Some(stamp);
        }
    }
    None
}

impl Drop for SensorPoller {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::{MemoryStore, RecordKind, memory_logger};
    use crate::hardware::SimulatedRig;
    use crate::trials::Side;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    #[test]
    fn test_latches_licks_and_logs_samples() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = MemoryStore::new();
        let logger = memory_logger(&store, dir.path(), Arc::clone(&clock));
        let rig = SimulatedRig::scripted(Arc::clone(&clock));
        rig.script_lick(0.0, Side::Left);

        let gate = Arc::new(SyncGate::new());
        let poller = SensorPoller::start(
            Box::new(rig.sensor_source()),
            500.0,
            logger.handle(),
            Arc::clone(&gate),
            Arc::clone(&clock),
        )
        .unwrap();
        gate.open("session", clock.as_ref());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = SensorReading::default();
        while !seen.licked[0] && Instant::now() < deadline {
            seen = poller.take();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(seen.licked[0]);
        // Cleared by take
        assert_eq!(poller.take().licked, [false, false]);

        let samples = poller.stop().unwrap();
        assert!(samples > 0);
        logger.end(BTreeMap::new()).unwrap();
        assert_eq!(store.rows(RecordKind::Analog).len() as u64, samples);
        assert!(gate.offsets().contains_key("sensor"));
    }

    #[test]
    fn test_stop_before_gate_opens() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = MemoryStore::new();
        let logger = memory_logger(&store, dir.path(), Arc::clone(&clock));
        let rig = SimulatedRig::scripted(Arc::clone(&clock));
        let gate = Arc::new(SyncGate::new());
        let poller = SensorPoller::start(
            Box::new(rig.sensor_source()),
            500.0,
            logger.handle(),
            Arc::clone(&gate),
            Arc::clone(&clock),
        )
        .unwrap();

        assert_eq!(poller.stop().unwrap(), 0);
        assert!(!gate.offsets().contains_key("sensor"));
        gate.open("session", clock.as_ref());
        logger.end(BTreeMap::new()).unwrap();
        assert!(store.rows(RecordKind::Analog).is_empty());
    }

    #[test]
    fn test_rejects_bad_rate() {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let store = MemoryStore::new();
        let logger = memory_logger(&store, dir.path(), Arc::clone(&clock));
        let rig = SimulatedRig::scripted(Arc::clone(&clock));
        let result = SensorPoller::start(
            Box::new(rig.sensor_source()),
            0.0,
            logger.handle(),
            Arc::new(SyncGate::new()),
            clock,
        );
        assert!(result.is_err());
        logger.end(BTreeMap::new()).unwrap();
    }
}
