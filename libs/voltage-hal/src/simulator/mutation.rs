//! Background register drift
//!
//! The task holds only a weak reference to the device, so dropping the last
//! device handle ends it. Every tick checks its token before touching the
//! device and the device re-checks token and disposal before locking.

use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DeviceInner;

/// Start/stop handle for one device's drift task
#[derive(Debug, Default)]
pub(crate) struct MutationTask {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MutationTask {
    /// Spawn the task unless it already runs; must be called within a runtime
    pub fn start(&self, device: Weak<DeviceInner>, period: Duration) -> bool {
        let mut running = self.running.lock();
        if let Some((token, handle)) = running.as_ref() {
            if !token.is_cancelled() && !handle.is_finished() {
                return false;
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(device, period, token.clone()));
        *running = Some((token, handle));
        true
    }

    /// Cancel the task; the returned handle resolves once the loop has exited
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let (token, handle) = self.running.lock().take()?;
        token.cancel();
        Some(handle)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    /// Cancel without waiting, for use from `Drop`
    pub fn cancel(&self) {
        if let Some((token, _)) = self.running.lock().as_ref() {
            token.cancel();
        }
    }
}

async fn run(device: Weak<DeviceInner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let Some(inner) = device.upgrade() else {
            break;
        };
        if !inner.mutation_tick(&token) {
            break;
        }
    }

    debug!("Register drift task stopped");
}
