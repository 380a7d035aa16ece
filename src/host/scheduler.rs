// ! Main execution context
// !
// ! Module provides the single serialized context that owns `HostState`.
// ! Every registry mutation is submitted here as a closure; delayed work
// ! is expressed in ticks or converted to ticks from wall time.

use crate::core::error::{PlugError, PlugResult};
use crate::host::HostState;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Default tick length of the host's main loop
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

type Task = Box<dyn FnOnce(&mut HostState) + Send + 'static>;

enum Message {
    Now(Task),
    Later { ticks: u64, task: Task },
    Stop,
}

/// Handle to the host's main context
///
/// Cheap to clone; the context stops once every handle is dropped or
/// [`MainContext::stop`] is called.
#[derive(Clone)]
pub struct MainContext {
    tx: mpsc::UnboundedSender<Message>,
    tick: Arc<AtomicU64>,
    tick_length: Duration,
}

impl MainContext {
    /// Spawn the main context with the default tick
    pub fn start(host: HostState) -> Self {
        Self::with_tick(host, DEFAULT_TICK)
    }

    /// Spawn the main context with a custom tick length
    pub fn with_tick(host: HostState, tick_length: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let tick = Arc::new(AtomicU64::new(host.tick()));
        tokio::spawn(Self::drive(host, rx, tick.clone(), tick_length));
        info!("Main context started (tick {:?})", tick_length);
        Self {
            tx,
            tick,
            tick_length,
        }
    }

    /// Run `f` on the main context and wait for its result
    pub async fn run<F, R>(&self, f: F) -> PlugResult<R>
    where
        F: FnOnce(&mut HostState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(Message::Now(Box::new(move |host| {
            let _ = reply_tx.send(f(host));
        })))?;
        reply_rx
            .await
            .map_err(|_| PlugError::scheduler("main context task aborted"))
    }

    /// Run `f` after `ticks` ticks (at least one)
    pub fn run_later<F>(&self, ticks: u64, f: F) -> PlugResult<()>
    where
        F: FnOnce(&mut HostState) + Send + 'static,
    {
        self.submit(Message::Later {
            ticks: ticks.max(1),
            task: Box::new(f),
        })
    }

    /// Run `f` once `delay` has elapsed, rounded up to whole ticks
    pub fn run_after<F>(&self, delay: Duration, f: F) -> PlugResult<()>
    where
        F: FnOnce(&mut HostState) + Send + 'static,
    {
        let ticks = delay.as_nanos().div_ceil(self.tick_length.as_nanos().max(1));
        self.run_later(u64::try_from(ticks).unwrap_or(u64::MAX), f)
    }

    /// Ticks elapsed since the context started
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn tick_length(&self) -> Duration {
        self.tick_length
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop the context; pending delayed tasks are dropped
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    fn submit(&self, message: Message) -> PlugResult<()> {
        self.tx
            .send(message)
            .map_err(|_| PlugError::scheduler("main context is not running"))
    }

    async fn drive(
        mut host: HostState,
        mut rx: mpsc::UnboundedReceiver<Message>,
        tick: Arc<AtomicU64>,
        tick_length: Duration,
    ) {
        let mut interval = tokio::time::interval(tick_length);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        interval.tick().await;

        let mut delayed: BTreeMap<(u64, u64), Task> = BTreeMap::new();
        let mut seq = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = host.advance_tick();
                    tick.store(now, Ordering::Release);
                    while let Some(entry) = delayed.first_entry() {
                        if entry.key().0 > now {
                            break;
                        }
                        Self::execute(&mut host, entry.remove());
                    }
                }
                message = rx.recv() => match message {
                    Some(Message::Now(task)) => Self::execute(&mut host, task),
                    Some(Message::Later { ticks, task }) => {
                        seq += 1;
                        delayed.insert((host.tick().saturating_add(ticks), seq), task);
                    }
                    Some(Message::Stop) | None => break,
                },
            }
        }

        debug!("Main context stopped with {} delayed tasks pending", delayed.len());
    }

    fn execute(host: &mut HostState, task: Task) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task(host))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Task on main context panicked: {}", message);
        }
    }
}
