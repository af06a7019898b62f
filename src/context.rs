use std::any::Any;
use std::cell::RefCell;
use std::time::{Duration, Instant};

use crate::actor::{ActorId, ActorRef, SenderRef, WaitState};
use crate::exit::ExitReason;
use crate::message::{Payload, Timeout};
use crate::receive::Receive;

thread_local! {
    static CURRENT_ACTOR: RefCell<Option<ActorRef>> = RefCell::new(None);
}

/// The actor bound to the current worker thread, if any.
pub(crate) fn current_actor() -> Option<ActorRef> {
    CURRENT_ACTOR.with(|current| current.borrow().clone())
}

pub(crate) fn current_sender() -> SenderRef {
    current_actor()
        .map(SenderRef::of)
        .unwrap_or_else(SenderRef::nobody)
}

/// Binds `actor` to the current thread for the lifetime of the returned
/// guard. The reaction runner installs this around every reaction; the
/// binding never outlives it, so retired pool threads hold no actor.
pub(crate) fn bind(actor: ActorRef) -> Binding {
    let previous = CURRENT_ACTOR.with(|current| current.borrow_mut().replace(actor));
    Binding { previous }
}

pub(crate) struct Binding {
    previous: Option<ActorRef>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ACTOR.with(|current| *current.borrow_mut() = previous);
    }
}

/// Handle on the running actor, passed to every body and handler.
///
/// The blocking receive family lives here; the event-based counterparts
/// ([`crate::react`], [`crate::react_within`]) are free functions because
/// they only build a value for the runner to act on.
pub struct Context {
    me: ActorRef,
}

impl Context {
    pub(crate) fn new(me: ActorRef) -> Context {
        Context { me }
    }

    pub fn me(&self) -> &ActorRef {
        &self.me
    }

    /// The sender of the message currently being handled, or the null
    /// sender outside any handler.
    pub fn sender(&self) -> SenderRef {
        self.me.top_sender()
    }

    /// Replies to the current sender: over its single-use reply channel if
    /// the message was an ask, as an ordinary send otherwise.
    pub fn reply<M: Any + Send>(&self, msg: M) {
        self.sender().reply_from(&self.me, Payload::new(msg));
    }

    /// Sends `msg` to `target` on behalf of the original sender: the
    /// receiver will see the current sender, not this actor.
    pub fn forward<M: Any + Send>(&self, target: &ActorRef, msg: M) {
        target.deliver(Payload::new(msg), self.sender(), None);
    }

    /// Links this actor with `peer`. Symmetric and idempotent; linking to a
    /// terminated actor is a no-op.
    pub fn link(&self, peer: &ActorRef) {
        self.me.registry().link(&self.me, peer);
    }

    pub fn unlink(&self, peer: &ActorRef) {
        self.me.registry().unlink(self.me.id(), peer.id());
    }

    pub fn trap_exit(&self) -> bool {
        self.me.traps_exit()
    }

    /// With trap-exit set, exits of linked peers arrive as ordinary
    /// [`crate::Exit`] messages instead of terminating this actor.
    pub fn set_trap_exit(&self, trap: bool) {
        self.me.set_traps_exit(trap);
    }

    /// Thread-based wait: blocks the current worker until a message
    /// matching `handler` arrives, runs the matching arm, and returns its
    /// result. `Err` means a linked peer terminated this actor while it
    /// waited; propagate it out of the body with `?`.
    pub fn receive<R>(&mut self, handler: Receive<R>) -> Result<R, ExitReason> {
        self.receive_inner(handler, None, None)
    }

    /// [`Context::receive`] with a deadline. On expiry a [`Timeout`]
    /// message is synthesized for the handler; a handler with no `Timeout`
    /// arm turns the expiry into an abnormal exit.
    pub fn receive_within<R>(
        &mut self,
        within: Duration,
        handler: Receive<R>,
    ) -> Result<R, ExitReason> {
        self.receive_inner(handler, Some(within), None)
    }

    /// [`Context::receive`] narrowed to messages sent by `from`.
    pub fn receive_from<R>(
        &mut self,
        from: &ActorRef,
        handler: Receive<R>,
    ) -> Result<R, ExitReason> {
        self.receive_inner(handler, None, Some(from.id()))
    }

    fn receive_inner<R>(
        &mut self,
        mut handler: Receive<R>,
        within: Option<Duration>,
        from: Option<ActorId>,
    ) -> Result<R, ExitReason> {
        let deadline = within.map(|within| Instant::now() + within);
        let timeout_probe = Payload::new(Timeout);
        let me = self.me.clone();
        let mut inner = me.lock_inner();
        loop {
            if let Some(reason) = inner.pending_exit.take() {
                inner.wait = WaitState::None;
                return Err(reason);
            }
            let extracted = inner.mailbox.extract_first_entry(|entry| {
                let sender_ok = match from {
                    Some(id) => entry.sender.actor().map_or(false, |actor| actor.id() == id),
                    None => true,
                };
                sender_ok && handler.accepts(&entry.msg)
            });
            if let Some(entry) = extracted {
                inner.wait = WaitState::None;
                inner.sender_stack.push(entry.sender.clone());
                drop(inner);
                let result = handler.apply(self, entry.msg);
                me.pop_sender();
                return Ok(result);
            }
            inner.wait = WaitState::Thread;
            match deadline {
                None => {
                    inner = me.wakeup().wait(inner).unwrap_or_else(|err| err.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        inner.wait = WaitState::None;
                        if handler.accepts(&timeout_probe) {
                            inner.sender_stack.push(SenderRef::nobody());
                            drop(inner);
                            let result = handler.apply(self, Payload::new(Timeout));
                            me.pop_sender();
                            return Ok(result);
                        }
                        return Err(ExitReason::abnormal("receive timed out"));
                    }
                    // Spurious wakeups just shrink the remaining budget.
                    let (guard, _) = me
                        .wakeup()
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(|err| err.into_inner());
                    inner = guard;
                }
            }
        }
    }
}
