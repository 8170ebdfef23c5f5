//! Tokio-backed periodic trigger.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dropsync_core::{Scheduler, TickHandler};

type SharedHandler = Arc<Mutex<Option<Arc<dyn TickHandler>>>>;

/// Periodic trigger driven by `tokio::time::interval`.
///
/// Each arming runs its own task. Ticks within one arming are delivered
/// sequentially and missed ticks are skipped, so a slow handler never sees
/// a burst of catch-up ticks. Disarming cancels the tick loop but lets a
/// handler invocation that is already running finish.
pub struct IntervalScheduler {
    handler: SharedHandler,
    armed: Mutex<Option<CancellationToken>>,
}

impl IntervalScheduler {
    /// Create a disarmed scheduler with no handler.
    pub fn new() -> Self {
        Self {
            handler: Arc::new(Mutex::new(None)),
            armed: Mutex::new(None),
        }
    }

    fn arm(&self, period: Duration, first_fire: Duration) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "cannot arm scheduler outside a Tokio runtime");
                return;
            }
        };

        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.armed).replace(token.clone()) {
            previous.cancel();
        }

        debug!(?period, ?first_fire, "scheduler armed");
        runtime.spawn(run_ticks(Arc::clone(&self.handler), period, first_fire, token));
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Scheduler for IntervalScheduler {
    fn register(&self, handler: Arc<dyn TickHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    fn start(&self, period: Duration) {
        self.arm(period, Duration::ZERO);
    }

    fn resume(&self, period: Duration) {
        self.arm(period, period);
    }

    fn stop(&self) {
        if let Some(token) = lock(&self.armed).take() {
            token.cancel();
            debug!("scheduler disarmed");
        }
    }

    fn is_armed(&self) -> bool {
        lock(&self.armed).is_some()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticks(
    handler: SharedHandler,
    period: Duration,
    first_fire: Duration,
    token: CancellationToken,
) {
    // interval_at panics on a zero period
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + first_fire, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // A stop may land between the tick and the handler call
        if token.is_cancelled() {
            break;
        }

        let current = lock(&handler).clone();
        match current {
            Some(handler) => handler.on_tick().await,
            None => debug!("scheduler tick with no handler registered"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
