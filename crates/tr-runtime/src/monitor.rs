//! Enforcement Monitor
//!
//! Keeps a target title applied to a page. Two independent triggers feed the
//! same idempotent reassert step: host title-change notifications (via
//! [`EnforcementSession::nudge`]) and a fixed-interval poll for mutation
//! paths the host cannot observe. Both are owned by the session and stop
//! together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::host::{HostError, PageHost};

/// Monitor state for one page view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    /// No rule applies
    Idle,
    /// A target title is set and being defended
    Pinned { target: String },
}

/// Overwrite the displayed title if it differs from `target`.
///
/// Returns whether a write was made. Running it against an already correct
/// title is a no-op.
pub async fn reassert(host: &dyn PageHost, target: &str) -> Result<bool, HostError> {
    let shown = host.displayed_title().await?;
    if shown == target {
        return Ok(false);
    }
    host.set_displayed_title(target).await?;
    Ok(true)
}

/// A pinned title and the machinery defending it.
///
/// Dropping the session cancels both triggers.
pub struct EnforcementSession {
    target: Arc<str>,
    generation: u64,
    cancel: CancellationToken,
    nudge: Arc<Notify>,
    corrections: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl EnforcementSession {
    /// Write `target` immediately, then start defending it.
    ///
    /// `on_lost` runs at most once, from the defense task, if a host call
    /// fails while the session is still active.
    pub async fn pin<F>(
        host: Arc<dyn PageHost>,
        target: String,
        poll_interval: Duration,
        generation: u64,
        cancel: CancellationToken,
        on_lost: F,
    ) -> Result<Self, HostError>
    where
        F: FnOnce(HostError) + Send + 'static,
    {
        host.set_displayed_title(&target).await?;

        let target: Arc<str> = Arc::from(target);
        let nudge = Arc::new(Notify::new());
        let corrections = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(defend(
            host,
            Arc::clone(&target),
            cancel.clone(),
            Arc::clone(&nudge),
            Arc::clone(&corrections),
            poll_interval,
            on_lost,
        ));

        log::debug!("pinned title {target:?} (generation {generation})");

        Ok(Self {
            target,
            generation,
            cancel,
            nudge,
            corrections,
            task,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Page-view generation this session was pinned under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Number of overwrites made since pinning (not counting the first write).
    pub fn corrections(&self) -> u64 {
        self.corrections.load(Ordering::Relaxed)
    }

    /// Title-change notification from the host.
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop defending. Cancels the poll timer and notification trigger
    /// before returning.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for EnforcementSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
        log::debug!("unpinned title {:?} (generation {})", self.target, self.generation);
    }
}

async fn defend<F>(
    host: Arc<dyn PageHost>,
    target: Arc<str>,
    cancel: CancellationToken,
    nudge: Arc<Notify>,
    corrections: Arc<AtomicU64>,
    poll_interval: Duration,
    on_lost: F,
) where
    F: FnOnce(HostError) + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = nudge.notified() => {}
            _ = ticker.tick() => {}
        }

        match reassert(host.as_ref(), &target).await {
            Ok(true) => {
                corrections.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(err) => {
                if !cancel.is_cancelled() {
                    log::warn!("{err}; abandoning pinned title");
                    on_lost(err);
                }
                return;
            }
        }
    }
}
