//! Background loops: the periodic sweep and the outbox drain.
//!
//! Both stop when [`BackgroundTasks::shutdown`] is called; an in-flight
//! pass finishes first.

use std::sync::Arc;
use std::time::Duration;

use atl_notify::Dispatcher;
use atl_workflow::Clock;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::sweep::Sweep;

/// Handles of the spawned loops plus the shared stop signal.
pub struct BackgroundTasks {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            handles: Vec::new(),
        }
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for h in self.handles {
            if let Err(e) = h.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

/// Run the sweep every `interval`. The first pass runs immediately.
pub fn spawn_sweep_loop(
    sweep: Arc<Sweep>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            if let Err(e) = sweep.run_once().await {
                warn!(error = %e, kind = %e.kind(), "sweep pass aborted");
            }
        }
        info!("sweep loop stopped");
    })
}

/// Drain the outbox every `poll_interval`, or as soon as `kick` fires.
///
/// A full batch is followed by another pass without waiting.
pub fn spawn_outbox_loop(
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    batch_size: u32,
    kick: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = kick.notified() => {}
                _ = stop.changed() => break,
            }
            loop {
                match dispatcher.drain_once(clock.now()).await {
                    Ok(report) if report.claimed >= batch_size as usize => continue,
                    Ok(_) => break,
                    Err(e) => {
                        warn!(error = %e, kind = %e.kind(), "outbox drain aborted");
                        break;
                    }
                }
            }
        }
        info!(dispatcher = %dispatcher.dispatcher_id(), "outbox loop stopped");
    })
}
