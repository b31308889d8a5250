//! Interval-driven background loop around [`ReminderDispatcher`].
//!
//! One scheduler is built in `main` and shared through `AppState`. Start and
//! stop are idempotent so repeated bootstrap calls never produce a second loop,
//! which would double-send reminders.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reminders::dispatcher::{DispatchOptions, ReminderDispatcher};
use crate::reminders::error::DispatchError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest interval accepted from configuration or the control surface.
pub const MAX_INTERVAL_MINUTES: u64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Give up on a pass that runs longer than this. `None` waits forever.
    pub pass_timeout: Option<Duration>,
    /// How long `stop` waits for the loop to wind down.
    pub stop_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            pass_timeout: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_minutes: u64,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ReminderScheduler {
    dispatcher: Arc<ReminderDispatcher>,
    pass_timeout: Option<Duration>,
    stop_timeout: Duration,
    // Serializes start/stop so two callers can't both spawn a loop.
    handle: Mutex<Option<LoopHandle>>,
    running: AtomicBool,
    interval_secs: AtomicU64,
}

impl ReminderScheduler {
    pub fn new(dispatcher: Arc<ReminderDispatcher>, config: SchedulerConfig) -> Self {
        Self {
            dispatcher,
            pass_timeout: config.pass_timeout,
            stop_timeout: config.stop_timeout,
            handle: Mutex::new(None),
            running: AtomicBool::new(false),
            interval_secs: AtomicU64::new(config.interval.as_secs()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<ReminderDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            interval_minutes: self.interval().as_secs() / 60,
        }
    }

    /// Starts the loop. Already running is a no-op and keeps the current interval.
    pub async fn start(&self, interval: Option<Duration>) -> SchedulerStatus {
        match self.try_start(interval).await {
            Some(status) => status,
            None => self.status(),
        }
    }

    /// Like [`start`](Self::start), but returns `None` when a loop was already
    /// running and nothing was spawned.
    ///
    /// If a stopped loop is still finishing its last pass, the new loop waits
    /// for it before its own first pass.
    pub async fn try_start(&self, interval: Option<Duration>) -> Option<SchedulerStatus> {
        let mut slot = self.handle.lock().await;

        if slot
            .as_ref()
            .is_some_and(|h| !h.cancel.is_cancelled() && !h.task.is_finished())
        {
            warn!("Reminder scheduler is already running");
            return None;
        }

        let previous = slot.take().map(|h| h.task).filter(|t| !t.is_finished());
        if previous.is_some() {
            info!("Previous reminder pass still running; new loop will wait for it");
        }

        if let Some(interval) = interval {
            self.interval_secs.store(interval.as_secs(), Ordering::SeqCst);
        }
        let interval = self.interval();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.dispatcher),
            interval,
            self.pass_timeout,
            cancel.clone(),
            previous,
        ));
        *slot = Some(LoopHandle { cancel, task });
        self.running.store(true, Ordering::SeqCst);

        info!(
            interval_minutes = interval.as_secs() / 60,
            "Reminder scheduler started"
        );
        Some(self.status())
    }

    /// Signals the loop to stop and waits a bounded time for it to exit.
    ///
    /// A pass that is already sending is not interrupted; it finishes on its
    /// own and no further pass begins. Until it does, the cancelled loop stays
    /// in the slot so a later `start` can wait for it.
    pub async fn stop(&self) -> SchedulerStatus {
        let mut slot = self.handle.lock().await;

        let Some(h) = (*slot).as_mut().filter(|h| !h.cancel.is_cancelled()) else {
            warn!("Reminder scheduler is not running");
            return self.status();
        };

        h.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);

        let outcome = tokio::time::timeout(self.stop_timeout, &mut h.task).await;
        match outcome {
            Ok(joined) => {
                *slot = None;
                match joined {
                    Ok(()) => info!("Reminder scheduler stopped"),
                    Err(e) => error!(error = %e, "Reminder loop ended abnormally"),
                }
            }
            Err(_) => warn!(
                timeout_secs = self.stop_timeout.as_secs(),
                "Reminder loop did not exit in time; it will stop after the current pass"
            ),
        }
        self.status()
    }

    pub async fn restart(&self, interval: Option<Duration>) -> SchedulerStatus {
        self.stop().await;
        self.start(interval).await
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Some(h) = self.handle.get_mut().take() {
            h.cancel.cancel();
        }
    }
}

async fn run_loop(
    dispatcher: Arc<ReminderDispatcher>,
    interval: Duration,
    pass_timeout: Option<Duration>,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        // never query while the stopped loop's last pass is still sending
        if let Err(e) = previous.await {
            error!(error = %e, "Previous reminder loop ended abnormally");
        }
    }

    loop {
        if cancel.is_cancelled() {
            debug!("Reminder loop cancelled");
            break;
        }
        run_pass(&dispatcher, pass_timeout).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Reminder loop cancelled");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Runs one pass in its own task so a panic is reported as a `JoinError`
/// instead of taking the loop down.
async fn run_pass(dispatcher: &Arc<ReminderDispatcher>, pass_timeout: Option<Duration>) {
    info!("Running appointment reminder check");

    let d = Arc::clone(dispatcher);
    let mut task = tokio::spawn(async move { d.dispatch(DispatchOptions::default()).await });

    let joined = match pass_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                // abort so the next pass never overlaps this one
                task.abort();
                error!(error = %DispatchError::TimedOut(limit), "Reminder pass abandoned");
                return;
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(summary)) => debug!(
            matched = summary.matched,
            sent = summary.sent,
            failed = summary.failed,
            "Appointment reminder check completed"
        ),
        Ok(Err(e)) => error!(error = %e, "Reminder pass failed"),
        Err(e) => error!(error = %e, "Reminder pass panicked"),
    }
}
