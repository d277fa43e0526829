//! Background refresh scheduler.
//!
//! A named thread waits on a command channel with the refresh period as the
//! receive timeout: a timeout is a tick, a `RefreshNow` is an immediate pass,
//! and `Stop` (or a dropped handle) ends the loop. Stopping joins the thread,
//! so no refresh is running once `stop` returns.

use crate::locks::lock;
use crate::refresh::{RefreshReport, Refresher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
enum SchedulerCommand {
    RefreshNow,
    Stop,
}

#[derive(Debug, Default)]
struct SchedulerStats {
    passes: AtomicU64,
    last_report: Mutex<Option<RefreshReport>>,
}

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Spawn the scheduler thread. The first pass runs one `period` after
    /// start; callers wanting an immediate pass call
    /// [`SchedulerHandle::trigger`] or refresh synchronously beforehand.
    pub fn start(refresher: Arc<Refresher>, period: Duration) -> std::io::Result<SchedulerHandle> {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(SchedulerStats::default());
        let thread_stats = Arc::clone(&stats);

        let join = thread::Builder::new()
            .name("tickerwatch-scheduler".into())
            .spawn(move || {
                tracing::info!(period_secs = period.as_secs_f64(), "refresh scheduler started");
                loop {
                    match rx.recv_timeout(period) {
                        Ok(SchedulerCommand::RefreshNow) | Err(RecvTimeoutError::Timeout) => {
                            let report = refresher.refresh_all();
                            thread_stats.passes.fetch_add(1, Ordering::SeqCst);
                            *lock(&thread_stats.last_report) = Some(report);
                        }
                        Ok(SchedulerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("refresh scheduler stopped");
            })?;

        Ok(SchedulerHandle {
            tx,
            join: Some(join),
            stats,
        })
    }
}

/// Owner of the scheduler thread. Dropping it stops the thread.
pub struct SchedulerHandle {
    tx: Sender<SchedulerCommand>,
    join: Option<JoinHandle<()>>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    /// Ask for a pass as soon as the current one (if any) finishes.
    pub fn trigger(&self) {
        let _ = self.tx.send(SchedulerCommand::RefreshNow);
    }

    /// Number of passes completed so far.
    pub fn passes(&self) -> u64 {
        self.stats.passes.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<RefreshReport> {
        lock(&self.stats.last_report).clone()
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.tx.send(SchedulerCommand::Stop);
        if join.join().is_err() {
            tracing::error!("refresh scheduler thread panicked");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
