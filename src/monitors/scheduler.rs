//! Per-monitor recurring jobs.
//!
//! Every active monitor owns one tokio task that sleeps until its next
//! cadence boundary and then fires a check. Fires never overlap: a tick that
//! arrives while the previous fire is still running is skipped.

use chrono::{Local, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cadence::Cadence;
use super::checker::CheckDispatcher;
use super::status_recorder::StatusRecorder;
use crate::db::models::Monitor;
use crate::db::services::{MonitorStore, StoreError};

struct FireContext {
    store: Arc<dyn MonitorStore>,
    dispatcher: Arc<CheckDispatcher>,
    recorder: Arc<StatusRecorder>,
}

struct JobHandle {
    handle: JoinHandle<()>,
    cadence: Cadence,
}

/// Clears the in-flight flag when a fire finishes, however it finishes.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The job registry. At most one job exists per monitor id.
pub struct Scheduler {
    ctx: Arc<FireContext>,
    jobs: DashMap<i32, JobHandle>,
    in_flight: DashMap<i32, Arc<AtomicBool>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        dispatcher: Arc<CheckDispatcher>,
        recorder: Arc<StatusRecorder>,
    ) -> Self {
        Self {
            ctx: Arc::new(FireContext {
                store,
                dispatcher,
                recorder,
            }),
            jobs: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// (Re)starts the job for `id`. Returns false when the monitor is missing or inactive.
    pub async fn schedule_monitor(&self, id: i32) -> bool {
        self.stop_monitor(id);

        let monitor = match self.ctx.store.get_by_id(id).await {
            Ok(Some(monitor)) if monitor.active => monitor,
            Ok(_) => {
                debug!(monitor_id = id, "Monitor missing or inactive; not scheduling.");
                return false;
            }
            Err(e) => {
                error!(monitor_id = id, error = %e, "Failed to load monitor for scheduling.");
                return false;
            }
        };

        let cadence = Cadence::from_interval(monitor.interval, &mut rand::rng());
        let next = cadence.next_fire_after(Local::now());
        if let Err(e) = self
            .ctx
            .store
            .set_next_check_at(id, next.with_timezone(&Utc))
            .await
        {
            warn!(monitor_id = id, error = %e, "Failed to store next check time.");
        }

        let in_flight = self.in_flight.entry(id).or_default().clone();
        let handle = tokio::spawn(run_job(
            self.ctx.clone(),
            Arc::new(monitor),
            cadence,
            in_flight,
        ));
        if let Some(replaced) = self.jobs.insert(id, JobHandle { handle, cadence }) {
            replaced.handle.abort();
        }
        info!(monitor_id = id, ?cadence, "Monitor scheduled.");
        true
    }

    /// Cancels the job for `id`. Returns false if none was registered.
    pub fn stop_monitor(&self, id: i32) -> bool {
        let stopped = match self.jobs.remove(&id) {
            Some((_, job)) => {
                job.handle.abort();
                info!(monitor_id = id, "Monitor stopped.");
                true
            }
            None => false,
        };
        // A fire still running keeps its flag so a reschedule waits for it.
        self.in_flight
            .remove_if(&id, |_, flag| !flag.load(Ordering::SeqCst));
        stopped
    }

    /// Cancels every job, returning how many were running.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<i32> = self.jobs.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.stop_monitor(*id)).count()
    }

    /// Stops everything and schedules each active monitor afresh.
    pub async fn reset_all_monitors(&self) -> usize {
        let stopped = self.stop_all();
        let monitors = match self.ctx.store.get_all_active().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!(error = %e, "Failed to load active monitors.");
                return 0;
            }
        };

        let mut started = 0;
        for monitor in monitors {
            if self.schedule_monitor(monitor.id).await {
                started += 1;
            }
        }
        info!(stopped, started, "Monitors reset.");
        started
    }

    pub fn is_scheduled(&self, id: i32) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn cadence_of(&self, id: i32) -> Option<Cadence> {
        self.jobs.get(&id).map(|job| job.cadence)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.jobs.iter() {
            entry.handle.abort();
        }
    }
}

/// `snapshot` is the monitor as loaded at scheduling time. Fires reload it;
/// the snapshot only stands in when a fire fails before the reload succeeds.
async fn run_job(
    ctx: Arc<FireContext>,
    snapshot: Arc<Monitor>,
    cadence: Cadence,
    in_flight: Arc<AtomicBool>,
) {
    fire(&ctx, &snapshot, &in_flight);

    // Boundaries are computed on the wall clock once and then chained on the
    // monotonic clock.
    let mut wall = Local::now();
    let mut deadline = Instant::now();
    loop {
        let next = cadence.next_fire_after(wall);
        deadline += (next - wall).to_std().unwrap_or(Duration::from_secs(1));
        wall = next;
        tokio::time::sleep_until(deadline).await;
        fire(&ctx, &snapshot, &in_flight);
    }
}

fn fire(ctx: &Arc<FireContext>, snapshot: &Arc<Monitor>, in_flight: &Arc<AtomicBool>) {
    if in_flight.swap(true, Ordering::SeqCst) {
        debug!(monitor_id = snapshot.id, "Previous check still running; skipping tick.");
        return;
    }
    let guard = InFlightGuard(in_flight.clone());
    let ctx = ctx.clone();
    let snapshot = snapshot.clone();
    tokio::spawn(async move {
        let _guard = guard;
        run_protected(ctx, snapshot).await;
    });
}

/// Runs one fire in its own task so that errors and panics become a DOWN row
/// instead of taking the job down.
async fn run_protected(ctx: Arc<FireContext>, snapshot: Arc<Monitor>) {
    let id = snapshot.id;
    let outcome = tokio::spawn(run_fire(ctx.clone(), id)).await;
    let detail = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => {
            error!(monitor_id = id, error = %e, "Check fire failed.");
            e.to_string()
        }
        Err(join) if join.is_panic() => {
            error!(monitor_id = id, "Check fire panicked.");
            String::new()
        }
        Err(_) => return,
    };
    let monitor = match ctx.store.get_by_id(id).await {
        Ok(Some(current)) => current,
        _ => Monitor::clone(&snapshot),
    };
    if let Err(e) = ctx.recorder.record_fault(&monitor, &detail).await {
        error!(monitor_id = id, error = %e, "Failed to record execution fault.");
    }
}

async fn run_fire(ctx: Arc<FireContext>, id: i32) -> Result<(), StoreError> {
    let Some(monitor) = ctx.store.get_by_id(id).await? else {
        debug!(monitor_id = id, "Monitor vanished before its check ran.");
        return Ok(());
    };
    if !monitor.active {
        return Ok(());
    }
    let result = ctx.dispatcher.dispatch(&monitor).await;
    ctx.recorder.record(&monitor, &result).await?;
    Ok(())
}
