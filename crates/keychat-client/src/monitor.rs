//! Periodic refresh loop.
//!
//! While started or resumed, each cycle notifies every [`RefreshListener`]
//! and then sleeps the configured interval. While paused it only re-checks
//! its state every second. A cycle that finds another one still running
//! (the loop or a [`Monitor::refresh_now`] call) is skipped, never queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keychat_net::ObserverList;
use keychat_shared::constants::PAUSED_POLL_INTERVAL_MS;

use crate::error::ClientError;
use crate::gateway::IdentityGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Started,
    Paused,
    Resumed,
}

pub trait RefreshListener: Send + Sync {
    fn on_refresh(&self) -> anyhow::Result<()>;
}

struct Inner {
    gateway: Arc<dyn IdentityGateway>,
    interval: Duration,
    state: Mutex<MonitorState>,
    refreshing: Mutex<()>,
    cycles: AtomicUsize,
    listeners: ObserverList<dyn RefreshListener>,
    wake: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(gateway: Arc<dyn IdentityGateway>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                interval,
                state: Mutex::new(MonitorState::Stopped),
                refreshing: Mutex::new(()),
                cycles: AtomicUsize::new(0),
                listeners: ObserverList::new(),
                wake: Notify::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RefreshListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn state(&self) -> MonitorState {
        self.inner.state()
    }

    /// Completed refresh cycles.
    pub fn cycles(&self) -> usize {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// Run the gateway's start hooks and spawn the loop. Does nothing if the
    /// loop is already running.
    pub fn start(&self) -> Result<(), ClientError> {
        if !self
            .inner
            .transition(|state| state == MonitorState::Stopped, MonitorState::Started)
        {
            debug!("Monitor already running");
            return Ok(());
        }

        let hooks = self
            .inner
            .gateway
            .on_start()
            .and_then(|()| self.inner.gateway.on_resume());
        if let Err(e) = hooks {
            self.inner.set_state(MonitorState::Stopped);
            return Err(e.into());
        }

        let handle = tokio::spawn(run(self.inner.clone()));
        if let Some(previous) = self.inner.task_slot().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = self.inner.interval.as_secs(), "Monitor started");
        Ok(())
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, MonitorState::Started | MonitorState::Resumed) {
            *state = MonitorState::Paused;
            debug!("Monitor paused");
        }
    }

    pub fn resume(&self) {
        let resumed = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == MonitorState::Paused {
                *state = MonitorState::Resumed;
                true
            } else {
                false
            }
        };
        if resumed {
            debug!("Monitor resumed");
            self.inner.wake.notify_one();
        }
    }

    /// Stop the loop and run the gateway's pause and stop hooks in the
    /// background. Returns the hook task, or `None` if already stopped.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        if !self
            .inner
            .transition(|state| state != MonitorState::Stopped, MonitorState::Stopped)
        {
            return None;
        }
        self.inner.wake.notify_one();
        if let Some(task) = self.inner.task_slot().take() {
            task.abort();
        }

        let gateway = self.inner.gateway.clone();
        let hooks = tokio::task::spawn_blocking(move || {
            if let Err(e) = gateway.on_pause() {
                warn!(error = %e, "Gateway pause hook failed");
            }
            if let Err(e) = gateway.on_stop() {
                warn!(error = %e, "Gateway stop hook failed");
            }
        });
        info!("Monitor stopped");
        Some(tokio::spawn(async move {
            if let Err(e) = hooks.await {
                warn!(error = %e, "Gateway shutdown hooks panicked");
            }
        }))
    }

    /// Run one refresh cycle now. Returns `false` if one was already running.
    pub fn refresh_now(&self) -> bool {
        self.inner.refresh()
    }
}

impl Inner {
    fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Move to `to` if the current state satisfies `from`, atomically.
    fn transition(&self, from: impl FnOnce(MonitorState) -> bool, to: MonitorState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !from(*state) {
            return false;
        }
        *state = to;
        true
    }

        fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refresh(&self) -> bool {
        let _running = match self.refreshing.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                debug!("Refresh already in progress, skipped");
                return false;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.listeners
            .notify_all("refresh", |listener| listener.on_refresh());
        self.cycles.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

async fn run(inner: Arc<Inner>) {
    loop {
        match inner.state() {
            MonitorState::Stopped => break,
            MonitorState::Paused => {
                inner
                    .sleep(Duration::from_millis(PAUSED_POLL_INTERVAL_MS))
                    .await
            }
            MonitorState::Started | MonitorState::Resumed => {
                inner.refresh();
                inner.sleep(inner.interval).await;
            }
        }
    }
    debug!("Monitor loop exited");
}
