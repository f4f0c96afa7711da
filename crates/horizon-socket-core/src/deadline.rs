//! Single-shot deadlines bound to an execution context.
//!
//! A [`DeadlineTimer`] lives inside the state of an
//! [`ExecutionContext`](crate::context::ExecutionContext). Arming it spawns
//! one sleep on the async runtime; when the sleep finishes, the expiry handler
//! is posted back to the context and runs there, never concurrently with
//! other work on that state.
//!
//! Every arm/disarm bumps a generation counter. An expiry only fires if the
//! generation it was armed with is still current when it reaches the worker,
//! so a late wakeup after [`disarm`](DeadlineTimer::disarm) is a no-op even
//! if the sleep had already completed.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::context::{SerialState, WeakContext};
use crate::logging::targets;

/// A one-shot timer whose expiry runs on a serial context.
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    generation: u64,
    armed: bool,
    sleep: Option<JoinHandle<()>>,
}

impl DeadlineTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any earlier deadline.
    ///
    /// `select` locates this timer inside the context state so the expiry can
    /// check its generation; `on_expire` then runs with the state borrowed.
    /// Returns the generation of this arming.
    pub fn arm<S, F>(
        &mut self,
        runtime: &Handle,
        duration: Duration,
        context: WeakContext<S>,
        select: fn(&mut S) -> &mut DeadlineTimer,
        on_expire: F,
    ) -> u64
    where
        S: SerialState,
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.disarm();
        self.armed = true;
        let generation = self.generation;

        self.sleep = Some(runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            context.run_serialized(move |state| {
                if select(state).fire(generation) {
                    on_expire(state);
                } else {
                    tracing::trace!(target: targets::TIMER, generation, "stale deadline ignored");
                }
            });
        }));

        tracing::trace!(target: targets::TIMER, generation, ?duration, "deadline armed");
        generation
    }

    /// Cancel the pending deadline, if any. Idempotent.
    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.armed = false;
        if let Some(sleep) = self.sleep.take() {
            sleep.abort();
        }
    }

    /// Check if a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Consume an expiry for `generation`. Returns `true` at most once per
    /// arming, and only if the timer was not disarmed or re-armed since.
    fn fire(&mut self, generation: u64) -> bool {
        if !self.armed || self.generation != generation {
            return false;
        }
        self.armed = false;
        self.sleep = None;
        tracing::debug!(target: targets::TIMER, generation, "deadline expired");
        true
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        if let Some(sleep) = self.sleep.take() {
            sleep.abort();
        }
    }
}
