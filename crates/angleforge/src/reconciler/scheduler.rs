//! Periodic sweep scheduler.
//!
//! Runs the sweep on a fixed interval in a background thread with its own
//! runtime, and accepts manual triggers via a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use super::Reconciler;

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: Duration,
    pub concurrency: usize,
    pub stuck_after_secs: u64,
}

/// Periodic sweep scheduler.
pub struct SweepScheduler {
    reconciler: Arc<Reconciler>,
    settings: SweepSettings,
    shutdown: Arc<AtomicBool>,
}

impl SweepScheduler {
    pub fn new(reconciler: Arc<Reconciler>, settings: SweepSettings) -> Self {
        Self {
            reconciler,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop in a background thread.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let settings = self.settings;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start sweep runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(settings.interval);
                interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual sweep triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    if let Err(e) = reconciler
                        .sweep(settings.concurrency, settings.stuck_after_secs)
                        .await
                    {
                        log::error!("Sweep failed: {}", e);
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
