use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::actor::{ActorId, ActorRef};
use crate::context::Context;
use crate::links::LinkRegistry;
use crate::reaction::{Flow, Reaction};

/// What the actor core asks of the worker pool.
///
/// Implementations run reactions somewhere, keep the live-actor count, and
/// track *pending reactions*: continuations captured by detached actors.
/// That count is what tells the pool an idle actor still has unfinished
/// work outstanding.
pub trait Scheduler: Send + Sync + 'static {
    /// Runs the bootstrap reaction of a newly started actor.
    fn start(&self, reaction: Reaction);

    /// Runs a continuation-driven reaction.
    fn execute(&self, reaction: Reaction);

    /// The actor is no longer live. The pool may quiesce when none remain.
    fn terminated(&self, actor: &ActorRef);

    /// Advisory heartbeat, recorded before each reaction.
    fn tick(&self, actor: &ActorRef);

    /// A continuation was captured and now awaits a matching message.
    fn pend_reaction(&self);

    /// A captured continuation was resubmitted or discarded.
    fn un_pend_reaction(&self);

    /// Arms a one-shot timer; the deadline waits are built on this.
    fn submit_timer(&self, after: Duration, wake: Box<dyn FnOnce() + Send>);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The default scheduler: a multi-thread tokio runtime.
///
/// Every reaction runs on the blocking pool, since a reaction may legally
/// park its thread inside a blocking receive; event-based actors occupy a
/// worker only for the duration of each reaction. Timers are plain tokio
/// sleep tasks.
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Clone for Stage {
    fn clone(&self) -> Stage {
        Stage {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Stage {
    fn default() -> Stage {
        Stage::new()
    }
}

struct StageInner {
    handle: tokio::runtime::Handle,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    registry: Arc<LinkRegistry>,
    live: Mutex<usize>,
    idle: Condvar,
    pending: AtomicUsize,
}

impl Stage {
    pub fn new() -> Stage {
        Stage::with_worker_threads(2)
    }

    /// `worker_threads` sizes the async side of the runtime (timers, any
    /// user tasks); reaction workers come from the blocking pool and grow
    /// on demand.
    pub fn with_worker_threads(worker_threads: usize) -> Stage {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("greenroom-worker")
            .enable_all()
            .build()
            .expect("failed to build the worker pool runtime");
        let handle = runtime.handle().clone();
        Stage {
            inner: Arc::new(StageInner {
                handle,
                runtime: Mutex::new(Some(runtime)),
                registry: Arc::new(LinkRegistry::new()),
                live: Mutex::new(0),
                idle: Condvar::new(),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates and starts an actor whose behavior is `body`, returning its
    /// handle. The body runs as the actor's bootstrap reaction.
    pub fn spawn<F>(&self, body: F) -> ActorRef
    where
        F: FnOnce(&mut Context) -> Flow + Send + 'static,
    {
        self.spawn_named("actor", body)
    }

    /// [`Stage::spawn`] with a name used in logs and `Debug` output.
    pub fn spawn_named<F>(&self, name: &str, body: F) -> ActorRef
    where
        F: FnOnce(&mut Context) -> Flow + Send + 'static,
    {
        let scheduler: Arc<dyn Scheduler> = self.inner.clone();
        let actor = ActorRef::create(name, scheduler, self.inner.registry.clone());
        self.inner.registry.register(&actor);
        *lock(&self.inner.live) += 1;
        debug!(actor = %name, id = %actor.id(), "spawning actor");
        self.inner
            .start(Reaction::bootstrap(actor.clone(), Box::new(body)));
        actor
    }

    /// Number of actors spawned on this pool and not yet terminated.
    pub fn live_actors(&self) -> usize {
        *lock(&self.inner.live)
    }

    /// Number of captured continuations currently awaiting a message.
    pub fn pending_reactions(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Snapshot of the actors linked to `actor`.
    pub fn links_of(&self, actor: &ActorRef) -> Vec<ActorId> {
        self.inner.registry.links_of(actor.id())
    }

    /// Blocks until every actor on this pool has terminated, or `within`
    /// elapses. Returns whether quiescence was reached.
    pub fn wait_quiescent(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        let mut live = lock(&self.inner.live);
        while *live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .idle
                .wait_timeout(live, deadline - now)
                .unwrap_or_else(|err| err.into_inner());
            live = guard;
        }
        true
    }
}

impl Scheduler for StageInner {
    fn start(&self, reaction: Reaction) {
        // Bootstrap and continuation reactions share the same pool.
        self.execute(reaction);
    }

    fn execute(&self, reaction: Reaction) {
        self.handle.spawn_blocking(move || reaction.run());
    }

    fn terminated(&self, _actor: &ActorRef) {
        let mut live = lock(&self.live);
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.idle.notify_all();
        }
    }

    fn tick(&self, actor: &ActorRef) {
        actor.record_tick();
    }

    fn pend_reaction(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    fn un_pend_reaction(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    fn submit_timer(&self, after: Duration, wake: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            wake();
        });
    }
}

impl Drop for StageInner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            // Non-blocking shutdown: the last handle may be dropped from a
            // worker of this very runtime.
            runtime.shutdown_background();
        }
    }
}
