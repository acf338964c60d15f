use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlx::AnyPool;
use sqlx::any::AnyRow;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::query::{Attempt, ConditionQuery};

/// Polls a [`ConditionQuery`] on a background task until it is satisfied
/// or cancelled.
///
/// The loop starts as soon as the watcher is constructed. It delivers at
/// most one row on [`result`](Self::result) and any number of errors on
/// [`errors`](Self::errors); both close when the loop terminates. A
/// watcher that failed to prepare its query closes `result` without a
/// value, so callers should always wait on both channels and a timeout:
///
/// ```no_run
/// # async fn demo(pool: sqlx::AnyPool) {
/// use std::time::Duration;
/// use condwatch::{Watcher, exists};
///
/// let mut watcher = Watcher::new(&pool, exists("jobs", "id = ?", [7]));
/// tokio::select! {
///     Ok(_row) = &mut watcher.result => println!("job 7 appeared"),
///     Some(err) = watcher.errors.recv() => eprintln!("{err}"),
///     _ = tokio::time::sleep(Duration::from_secs(5)) => eprintln!("timeout"),
/// }
/// watcher.close();
/// # }
/// ```
///
/// Errors are buffered up to the configured capacity. When the buffer is
/// full further errors are dropped (see [`dropped_errors`](Self::dropped_errors)),
/// so errors may be lost under sustained polling failure with a slow
/// consumer. Polling is never blocked by the error channel.
///
/// The loop is cancelled when the watcher's [`WatchControl`] is dropped.
/// Moving a channel out (`let rx = watcher.result;`) keeps the loop alive
/// only while the rest of the watcher is in scope; use
/// [`into_parts`](Self::into_parts) to hold the control handle separately.
pub struct Watcher {
    /// Resolves with the satisfying row, or with `RecvError` once the
    /// watcher terminated without one.
    pub result: oneshot::Receiver<AnyRow>,
    /// Attempt and setup errors in the order they occurred. Yields `None`
    /// after termination once drained.
    pub errors: mpsc::Receiver<WatchError>,
    control: WatchControl,
}

impl Watcher {
    /// Start watching with [`WatcherConfig::default`] (500ms poll interval).
    ///
    /// Must be called from within a tokio runtime. The pool stays owned by
    /// the caller; the watcher holds a handle to it for its lifetime.
    pub fn new<Q>(store: &AnyPool, query: Q) -> Self
    where
        Q: ConditionQuery + 'static,
    {
        Self::with_config(store, query, WatcherConfig::default())
    }

    /// Start watching with the default configuration and the given poll
    /// interval (millisecond granularity, see
    /// [`WatcherConfig::with_poll_interval`]).
    pub fn with_poll_interval<Q>(
        store: &AnyPool,
        query: Q,
        poll_interval: Duration,
    ) -> Self
    where
        Q: ConditionQuery + 'static,
    {
        Self::with_config(
            store,
            query,
            WatcherConfig::default().with_poll_interval(poll_interval),
        )
    }

    /// Start watching with an explicit configuration.
    pub fn with_config<Q>(
        store: &AnyPool,
        query: Q,
        config: WatcherConfig,
    ) -> Self
    where
        Q: ConditionQuery + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let (errors_tx, errors_rx) =
            mpsc::channel(config.effective_error_capacity());
        let cancel = CancellationToken::new();
        let terminated = CancellationToken::new();
        let dropped_errors = Arc::new(AtomicU64::new(0));
        let poll_interval = config.poll_interval();

        let watch_loop = WatchLoop {
            store: store.clone(),
            query,
            poll_interval,
            cancel: cancel.clone(),
            terminated: terminated.clone(),
            result_tx: Some(result_tx),
            errors_tx,
            dropped_errors: Arc::clone(&dropped_errors),
        };
        tokio::spawn(watch_loop.run());

        Self {
            result: result_rx,
            errors: errors_rx,
            control: WatchControl {
                _cancel_on_drop: cancel.clone().drop_guard(),
                cancel,
                terminated,
                dropped_errors,
                poll_interval,
            },
        }
    }

    /// Split into the result receiver, the error receiver and the control
    /// handle. The loop keeps running until the control handle is closed
    /// or dropped.
    pub fn into_parts(
        self,
    ) -> (
        oneshot::Receiver<AnyRow>,
        mpsc::Receiver<WatchError>,
        WatchControl,
    ) {
        (self.result, self.errors, self.control)
    }

    /// See [`WatchControl::close`].
    pub fn close(&self) {
        self.control.close();
    }

    /// See [`WatchControl::is_terminated`].
    pub fn is_terminated(&self) -> bool {
        self.control.is_terminated()
    }

    /// See [`WatchControl::terminated`].
    pub async fn terminated(&self) {
        self.control.terminated().await;
    }

    /// See [`WatchControl::dropped_errors`].
    pub fn dropped_errors(&self) -> u64 {
        self.control.dropped_errors()
    }

    /// Effective delay between attempts.
    pub fn poll_interval(&self) -> Duration {
        self.control.poll_interval
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

/// Cancellation and status handle for a running watcher. Dropping it
/// cancels the loop.
pub struct WatchControl {
    cancel: CancellationToken,
    terminated: CancellationToken,
    dropped_errors: Arc<AtomicU64>,
    poll_interval: Duration,
    _cancel_on_drop: DropGuard,
}

impl WatchControl {
    /// Stop polling. Safe to call any number of times, including after the
    /// watcher terminated on its own; never blocks.
    ///
    /// Takes effect at the loop's next wait point. An attempt already in
    /// flight completes first, and if it satisfied the condition its row is
    /// still delivered.
    pub fn close(&self) {
        if self.terminated.is_cancelled() {
            trace!(target: "condwatch::watcher", "close after termination ignored");
            return;
        }
        self.cancel.cancel();
    }

    /// Whether the loop has finished. Set before the channels close.
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Wait until the loop has finished.
    pub async fn terminated(&self) {
        self.terminated.cancelled().await;
    }

    /// Errors discarded because the error channel was full.
    pub fn dropped_errors(&self) -> u64 {
        self.dropped_errors.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for WatchControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchControl")
            .field("poll_interval", &self.poll_interval)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("terminated", &self.terminated.is_cancelled())
            .field("dropped_errors", &self.dropped_errors())
            .finish()
    }
}

/// State owned by the background task. Dropping it marks the watcher
/// terminated and then closes both channels.
struct WatchLoop<Q> {
    store: AnyPool,
    query: Q,
    poll_interval: Duration,
    cancel: CancellationToken,
    terminated: CancellationToken,
    result_tx: Option<oneshot::Sender<AnyRow>>,
    errors_tx: mpsc::Sender<WatchError>,
    dropped_errors: Arc<AtomicU64>,
}

impl<Q> WatchLoop<Q>
where
    Q: ConditionQuery,
{
    async fn run(mut self) {
        debug!(
            target: "condwatch::watcher",
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "condition watcher starting"
        );

        // Nothing was compiled, so there is nothing to close.
        if let Err(err) = self.query.prepare(&self.store).await {
            warn!(target: "condwatch::watcher", error = %err, "condition setup failed");
            self.report(err);
            return;
        }

        self.poll().await;
        self.query.close();
    }

    async fn poll(&mut self) {
        let mut ticker = time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(target: "condwatch::watcher", attempts, "condition watcher cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    attempts += 1;
                    match self.query.attempt(&self.store).await {
                        Ok(Attempt::Satisfied(row)) => {
                            debug!(target: "condwatch::watcher", attempts, "condition satisfied");
                            if let Some(tx) = self.result_tx.take()
                                && tx.send(row).is_err()
                            {
                                trace!(target: "condwatch::watcher", "result receiver already dropped");
                            }
                            return;
                        }
                        Ok(Attempt::Pending) => {
                            trace!(target: "condwatch::watcher", attempts, "condition pending");
                        }
                        Err(err) => {
                            warn!(target: "condwatch::watcher", attempts, error = %err, "condition attempt failed");
                            self.report(err);
                        }
                    }
                }
            }
        }
    }

    fn report(&self, err: WatchError) {
        match self.errors_tx.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                let dropped =
                    self.dropped_errors.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    target: "condwatch::watcher",
                    dropped,
                    error = %err,
                    "error channel full; dropping condition error"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(target: "condwatch::watcher", "error receiver already dropped");
            }
        }
    }
}

impl<Q> Drop for WatchLoop<Q> {
    fn drop(&mut self) {
        self.terminated.cancel();
    }
}
