// Background telemetry poller
//
// One thread drives `read_sensor_data` on a shared session and publishes
// each snapshot by swapping an `Arc`; readers clone the pointer and never
// see a half-written snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::DriverError;
use crate::sensors::SensorSnapshot;
use crate::session::Session;
use crate::transport::Transport;

/// Single-writer / multi-reader cell holding the latest snapshot
#[derive(Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Option<Arc<SensorSnapshot>>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot
    pub fn publish(&self, snapshot: SensorSnapshot) {
        let next = Arc::new(snapshot);
        match self.inner.write() {
            Ok(mut slot) => *slot = Some(next),
            Err(poisoned) => *poisoned.into_inner() = Some(next),
        }
    }

    /// Latest published snapshot, if any
    pub fn latest(&self) -> Option<Arc<SensorSnapshot>> {
        match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Handle to a running poller thread; stops the thread on drop
pub struct TelemetryPoller {
    snapshots: SnapshotCell,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPoller {
    /// Start polling `session` every `period`
    pub fn spawn<T>(session: Arc<Mutex<Session<T>>>, period: Duration) -> std::io::Result<Self>
    where
        T: Transport + 'static,
    {
        let snapshots = SnapshotCell::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let snapshots = snapshots.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("telemetry-poller".to_string())
                .spawn(move || poll_loop(session, snapshots, shutdown, period))?
        };

        Ok(Self {
            snapshots,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Cell the poller publishes into; clone it freely
    pub fn snapshots(&self) -> SnapshotCell {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<SensorSnapshot>> {
        self.snapshots.latest()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Telemetry poller panicked");
            }
        }
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<T: Transport>(
    session: Arc<Mutex<Session<T>>>,
    snapshots: SnapshotCell,
    shutdown: Arc<AtomicBool>,
    period: Duration,
) {
    info!("Telemetry poller started ({}ms period)", period.as_millis());

    while !shutdown.load(Ordering::Relaxed) {
        let result = {
            let Ok(mut session) = session.lock() else {
                error!("Poller: session mutex poisoned, exiting");
                break;
            };
            session.read_sensor_data()
        };

        match result {
            Ok(snapshot) => snapshots.publish(snapshot),
            Err(DriverError::NoDataYet) => {}
            Err(e) => {
                // Session is terminal (shut down or failed); nothing left to poll
                debug!("Poller stopping: {}", e);
                break;
            }
        }

        thread::sleep(period);
    }

    info!("Telemetry poller exiting");
}
