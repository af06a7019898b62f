use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::context;
use crate::exit::{AskError, Exit, ExitReason};
use crate::links::{self, LinkRegistry};
use crate::mailbox::{Entry, Mailbox};
use crate::message::{Payload, Timeout};
use crate::reaction::{Reaction, Waiting};
use crate::scheduler::Scheduler;

pub type ActorId = uuid::Uuid;

/// Advisory tick counter, bumped by the scheduler before every reaction.
pub(crate) struct Heartbeat {
    ticks: AtomicU64,
}

impl Heartbeat {
    fn new() -> Heartbeat {
        Heartbeat {
            ticks: AtomicU64::new(0),
        }
    }

    pub(crate) fn record(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Where a message came from, and where a reply to it should go.
///
/// A plain send records the sending actor (or nothing, for non-actor
/// threads). A synchronous ask additionally carries a fresh single-use reply
/// channel; replies prefer that channel and fall back to an ordinary send.
#[derive(Clone)]
pub struct SenderRef {
    actor: Option<ActorRef>,
    reply: Option<flume::Sender<Payload>>,
}

impl SenderRef {
    /// The null sender: messages from outside any actor.
    pub fn nobody() -> SenderRef {
        SenderRef {
            actor: None,
            reply: None,
        }
    }

    pub(crate) fn of(actor: ActorRef) -> SenderRef {
        SenderRef {
            actor: Some(actor),
            reply: None,
        }
    }

    pub(crate) fn with_reply(actor: Option<ActorRef>, reply: flume::Sender<Payload>) -> SenderRef {
        SenderRef {
            actor,
            reply: Some(reply),
        }
    }

    /// The sending actor, if the message came from one.
    pub fn actor(&self) -> Option<&ActorRef> {
        self.actor.as_ref()
    }

    pub(crate) fn reply_from(&self, from: &ActorRef, msg: Payload) {
        if let Some(reply) = &self.reply {
            // Single-use: a second reply on the same channel is dropped.
            let _ = reply.try_send(msg);
        } else if let Some(actor) = &self.actor {
            actor.deliver(msg, SenderRef::of(from.clone()), None);
        }
    }
}

impl fmt::Debug for SenderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.actor, &self.reply) {
            (Some(actor), _) => write!(f, "SenderRef({})", actor.name()),
            (None, Some(_)) => f.write_str("SenderRef(reply)"),
            (None, None) => f.write_str("SenderRef(nobody)"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Lifecycle {
    New,
    Running,
    Terminated,
}

pub(crate) enum WaitState {
    None,
    /// The owner is parked on the monitor's condvar; wake it and let it
    /// rescan.
    Thread,
    /// The owner detached a continuation and holds no thread.
    Event(Waiting),
}

pub(crate) struct Inner {
    pub(crate) mailbox: Mailbox,
    lifecycle: Lifecycle,
    pub(crate) wait: WaitState,
    /// Bumped on every wait transition; lets a react_within timer recognize
    /// that the wait it was armed for is gone.
    wait_gen: u64,
    /// An exit requested by a peer, honored at the next suspension point.
    pub(crate) pending_exit: Option<ExitReason>,
    exited: Option<ExitReason>,
    pub(crate) sender_stack: Vec<SenderRef>,
    /// Continuation chain: closures to run when the current block's final
    /// continuation completes. Combinators push onto it.
    chain: Vec<crate::reaction::BootstrapBody>,
}

pub(crate) struct ActorShared {
    id: ActorId,
    name: String,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<LinkRegistry>,
    trap_exit: AtomicBool,
    heartbeat: Heartbeat,
    inner: Mutex<Inner>,
    wakeup: Condvar,
}

/// Outcome of trying to install an event-based wait.
pub(crate) enum WaitInstall {
    /// Continuation stored; the reaction may end and free its worker.
    Parked,
    /// A queued message already matches: resume with it.
    Ready(Waiting, Entry),
    /// A pending exit takes precedence over waiting.
    Interrupted(ExitReason),
}

/// A cheap, cloneable handle to an actor.
///
/// Handles compare and hash by actor id. Sending through a handle never
/// fails; messages to a terminated actor are dropped, since the mailbox no
/// longer has a reader.
pub struct ActorRef {
    pub(crate) shared: Arc<ActorShared>,
}

impl Clone for ActorRef {
    fn clone(&self) -> ActorRef {
        ActorRef {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({}:{})", self.shared.name, self.shared.id)
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &ActorRef) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for ActorRef {}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl ActorRef {
    pub(crate) fn create(
        name: &str,
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<LinkRegistry>,
    ) -> ActorRef {
        ActorRef {
            shared: Arc::new(ActorShared {
                id: uuid::Uuid::new_v4(),
                name: name.to_string(),
                scheduler,
                registry,
                trap_exit: AtomicBool::new(false),
                heartbeat: Heartbeat::new(),
                inner: Mutex::new(Inner {
                    mailbox: Mailbox::new(),
                    lifecycle: Lifecycle::New,
                    wait: WaitState::None,
                    wait_gen: 0,
                    pending_exit: None,
                    exited: None,
                    sender_stack: Vec::new(),
                    chain: Vec::new(),
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> ActorId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Fire-and-forget send. The sender recorded with the message is the
    /// actor bound to the current thread, or the null sender.
    pub fn send<M: Any + Send>(&self, msg: M) {
        self.deliver(Payload::new(msg), context::current_sender(), None);
    }

    /// Synchronous request: sends `msg` with a fresh single-use reply
    /// channel attached and blocks until the receiver replies.
    pub fn ask<M: Any + Send>(&self, msg: M) -> Result<Payload, AskError> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let sender = SenderRef::with_reply(context::current_actor(), reply_tx);
        self.deliver(Payload::new(msg), sender, None);
        reply_rx.recv().map_err(|_| AskError::Unanswered)
    }

    /// [`ActorRef::ask`] with a deadline on the reply.
    pub fn ask_within<M: Any + Send>(
        &self,
        within: Duration,
        msg: M,
    ) -> Result<Payload, AskError> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let sender = SenderRef::with_reply(context::current_actor(), reply_tx);
        self.deliver(Payload::new(msg), sender, None);
        reply_rx.recv_timeout(within).map_err(|err| match err {
            flume::RecvTimeoutError::Timeout => AskError::TimedOut(within),
            flume::RecvTimeoutError::Disconnected => AskError::Unanswered,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.lock_inner().lifecycle == Lifecycle::Terminated
    }

    /// The reason this actor terminated with, once it has.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.lock_inner().exited.clone()
    }

    /// Number of messages currently queued.
    pub fn queued(&self) -> usize {
        self.lock_inner().mailbox.len()
    }

    /// How many reactions the scheduler has started for this actor.
    pub fn ticks(&self) -> u64 {
        self.shared.heartbeat.count()
    }

    pub(crate) fn record_tick(&self) {
        self.shared.heartbeat.record();
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.shared.scheduler
    }

    pub(crate) fn registry(&self) -> &Arc<LinkRegistry> {
        &self.shared.registry
    }

    pub(crate) fn traps_exit(&self) -> bool {
        self.shared.trap_exit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_traps_exit(&self, trap: bool) {
        self.shared.trap_exit.store(trap, Ordering::Relaxed);
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wakeup(&self) -> &Condvar {
        &self.shared.wakeup
    }

    /// Appends a message and resolves the receiver's waiting state.
    ///
    /// With `only_gen` set, delivery is conditional on the event wait of
    /// that generation still being current, which is how a react_within
    /// timer avoids enqueueing a stale [`Timeout`].
    pub(crate) fn deliver(&self, msg: Payload, sender: SenderRef, only_gen: Option<u64>) {
        let resume = {
            let mut inner = self.lock_inner();
            if inner.lifecycle == Lifecycle::Terminated {
                return;
            }
            if let Some(gen) = only_gen {
                let event_wait = matches!(inner.wait, WaitState::Event(_));
                if inner.wait_gen != gen || !event_wait {
                    return;
                }
            }
            inner.mailbox.append(msg, sender);
            let hit = match &inner.wait {
                WaitState::Thread => {
                    // The parked owner rescans with its own predicate.
                    self.shared.wakeup.notify_all();
                    false
                }
                WaitState::Event(waiting) => inner
                    .mailbox
                    .back_msg()
                    .map_or(false, |msg| waiting.accepts(msg)),
                WaitState::None => false,
            };
            if hit {
                let previous = std::mem::replace(&mut inner.wait, WaitState::None);
                inner.wait_gen += 1;
                match previous {
                    WaitState::Event(waiting) => {
                        let entry = inner.mailbox.extract_first(|msg| waiting.accepts(msg));
                        self.shared.scheduler.un_pend_reaction();
                        entry.map(|entry| (waiting, entry))
                    }
                    _ => None,
                }
            } else {
                None
            }
        };
        if let Some((waiting, entry)) = resume {
            self.shared
                .scheduler
                .execute(Reaction::resume(self.clone(), waiting, entry));
        }
    }

    pub(crate) fn send_timeout(&self, gen: u64) {
        self.deliver(Payload::new(Timeout), SenderRef::nobody(), Some(gen));
    }

    pub(crate) fn deliver_exit_signal(&self, from: &ActorRef, reason: &ExitReason) {
        self.deliver(
            Payload::new(Exit {
                from: from.clone(),
                reason: reason.clone(),
            }),
            SenderRef::of(from.clone()),
            None,
        );
    }

    /// Installs an event-based wait, unless a queued message or a pending
    /// exit preempts it. Arms the deadline timer when the wait carries one.
    pub(crate) fn install_wait(&self, waiting: Waiting) -> WaitInstall {
        let timer = {
            let mut inner = self.lock_inner();
            if let Some(reason) = inner.pending_exit.take() {
                return WaitInstall::Interrupted(reason);
            }
            if let Some(entry) = inner.mailbox.extract_first(|msg| waiting.accepts(msg)) {
                return WaitInstall::Ready(waiting, entry);
            }
            inner.wait_gen += 1;
            let gen = inner.wait_gen;
            let timer = waiting.timeout().map(|after| (gen, after));
            inner.wait = WaitState::Event(waiting);
            self.shared.scheduler.pend_reaction();
            timer
        };
        if let Some((gen, after)) = timer {
            let me = self.clone();
            self.shared
                .scheduler
                .submit_timer(after, Box::new(move || me.send_timeout(gen)));
        }
        WaitInstall::Parked
    }

    pub(crate) fn mark_running(&self) -> bool {
        let mut inner = self.lock_inner();
        match inner.lifecycle {
            Lifecycle::New => {
                inner.lifecycle = Lifecycle::Running;
                true
            }
            // A bootstrap may not start twice.
            _ => false,
        }
    }

    pub(crate) fn take_pending_exit(&self) -> Option<ExitReason> {
        self.lock_inner().pending_exit.take()
    }

    pub(crate) fn push_sender(&self, sender: SenderRef) {
        self.lock_inner().sender_stack.push(sender);
    }

    pub(crate) fn pop_sender(&self) {
        self.lock_inner().sender_stack.pop();
    }

    pub(crate) fn top_sender(&self) -> SenderRef {
        self.lock_inner()
            .sender_stack
            .last()
            .cloned()
            .unwrap_or_else(SenderRef::nobody)
    }

    pub(crate) fn push_chain(&self, continuation: crate::reaction::BootstrapBody) {
        self.lock_inner().chain.push(continuation);
    }

    pub(crate) fn pop_chain(&self) -> Option<crate::reaction::BootstrapBody> {
        self.lock_inner().chain.pop()
    }

    /// Terminates this actor on behalf of a linked peer.
    ///
    /// A detached actor is terminated inline (its stored continuation is
    /// discarded and un-pended); a thread-parked or running actor is marked
    /// and, if parked, woken to honor the exit itself.
    pub(crate) fn kill(&self, reason: ExitReason, visited: &mut HashSet<ActorId>) {
        let inline = {
            let mut inner = self.lock_inner();
            if inner.lifecycle == Lifecycle::Terminated {
                return;
            }
            match std::mem::replace(&mut inner.wait, WaitState::None) {
                WaitState::Event(_discarded) => {
                    inner.wait_gen += 1;
                    self.shared.scheduler.un_pend_reaction();
                    true
                }
                WaitState::Thread => {
                    inner.wait = WaitState::Thread;
                    inner.pending_exit = Some(reason.clone());
                    self.shared.wakeup.notify_all();
                    false
                }
                WaitState::None => {
                    inner.pending_exit = Some(reason.clone());
                    false
                }
            }
        };
        if inline {
            self.finish_with(reason, visited);
        }
    }

    pub(crate) fn finish(&self, reason: ExitReason) {
        let mut visited = HashSet::new();
        self.finish_with(reason, &mut visited);
    }

    /// Idempotent termination: records the reason, drops queued messages,
    /// propagates over links and notifies the scheduler.
    pub(crate) fn finish_with(&self, reason: ExitReason, visited: &mut HashSet<ActorId>) {
        {
            let mut inner = self.lock_inner();
            if inner.lifecycle == Lifecycle::Terminated {
                return;
            }
            inner.lifecycle = Lifecycle::Terminated;
            inner.exited = Some(reason.clone());
            inner.mailbox.clear();
            inner.pending_exit = None;
            inner.sender_stack.clear();
            inner.chain.clear();
            if matches!(inner.wait, WaitState::Event(_)) {
                self.shared.scheduler.un_pend_reaction();
            }
            inner.wait = WaitState::None;
            inner.wait_gen += 1;
        }
        debug!(actor = %self.shared.name, id = %self.shared.id, reason = %reason, "actor terminated");
        links::propagate_exit(self, &reason, visited);
        self.shared.scheduler.terminated(self);
    }

}
