use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::actor::{ActorRef, WaitInstall};
use crate::context::{self, Context};
use crate::exit::ExitReason;
use crate::mailbox::Entry;
use crate::message::{Payload, Timeout};
use crate::receive::Receive;

/// What a handler asks the scheduler to do next.
pub enum Next {
    /// This step is finished; run whatever the continuation chain holds, or
    /// terminate normally if it is empty.
    Done,
    /// Park until a matching message arrives, then resume with the stored
    /// handler. The current reaction ends and the worker is freed.
    Suspend(Waiting),
}

/// The value every actor body and every event-based handler returns.
///
/// `Err` terminates the actor with the given reason. This is the whole of
/// the control protocol: suspension is a return value, never a signal.
pub type Flow = Result<Next, ExitReason>;

/// Finish the current block.
pub fn done() -> Flow {
    Ok(Next::Done)
}

/// Terminate the current actor with `reason`. `exit("normal")` is a graceful
/// stop; any other reason propagates over links.
pub fn exit(reason: impl Into<ExitReason>) -> Flow {
    Err(reason.into())
}

/// Wait, event-based, for one message matching `handler`. The surrounding
/// reaction ends here; the handler runs as a fresh reaction once a matching
/// message arrives.
pub fn react(handler: Receive<Flow>) -> Flow {
    Ok(Next::Suspend(Waiting::once(handler)))
}

/// Like [`react`], with a deadline. If nothing matches within `within`, a
/// [`Timeout`] message is fed to the handler instead.
pub fn react_within(within: Duration, handler: Receive<Flow>) -> Flow {
    Ok(Next::Suspend(Waiting::once_within(handler, within)))
}

enum WaitHandler {
    /// A one-shot continuation: run once and yield a new `Flow`.
    Once(Receive<Flow>),
    /// A self-rearming continuation: runs on every matching message until an
    /// arm returns an exit reason.
    Forever(Receive<Result<(), ExitReason>>),
}

/// A captured continuation: the stored handler an event-based actor will run
/// on its next matching message, plus the optional deadline.
pub struct Waiting {
    handler: WaitHandler,
    timeout: Option<Duration>,
}

impl Waiting {
    pub(crate) fn once(handler: Receive<Flow>) -> Waiting {
        Waiting {
            handler: WaitHandler::Once(handler),
            timeout: None,
        }
    }

    pub(crate) fn once_within(handler: Receive<Flow>, within: Duration) -> Waiting {
        Waiting {
            handler: WaitHandler::Once(handler),
            timeout: Some(within),
        }
    }

    pub(crate) fn forever(handler: Receive<Result<(), ExitReason>>) -> Waiting {
        Waiting {
            handler: WaitHandler::Forever(handler),
            timeout: None,
        }
    }

    /// The waiting predicate: the handler's own acceptance, widened to the
    /// [`Timeout`] sentinel when a deadline is armed.
    pub(crate) fn accepts(&self, msg: &Payload) -> bool {
        if self.timeout.is_some() && msg.is::<Timeout>() {
            return true;
        }
        match &self.handler {
            WaitHandler::Once(handler) => handler.accepts(msg),
            WaitHandler::Forever(handler) => handler.accepts(msg),
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn resume(self, ctx: &mut Context, entry: Entry) -> Flow {
        let Waiting { handler, timeout } = self;
        match handler {
            WaitHandler::Once(mut handler) => {
                if handler.accepts(&entry.msg) {
                    handler.apply(ctx, entry.msg)
                } else {
                    // The deadline fired and the handler has no Timeout arm.
                    Err(ExitReason::abnormal("receive timed out"))
                }
            }
            WaitHandler::Forever(mut handler) => {
                if handler.accepts(&entry.msg) {
                    match handler.apply(ctx, entry.msg) {
                        Ok(()) => Ok(Next::Suspend(Waiting {
                            handler: WaitHandler::Forever(handler),
                            timeout,
                        })),
                        Err(reason) => Err(reason),
                    }
                } else {
                    Err(ExitReason::abnormal("receive timed out"))
                }
            }
        }
    }
}

pub(crate) type BootstrapBody = Box<dyn FnOnce(&mut Context) -> Flow + Send>;

enum Task {
    /// First reaction of an actor: no message, no handler, just the body.
    Bootstrap(BootstrapBody),
    /// A stored continuation resumed with the entry that matched it.
    Resume { waiting: Waiting, entry: Entry },
}

/// One scheduled execution: one actor consuming one message with one handler
/// (or running its bootstrap body). Reactions are created by the actor core
/// and consumed by the scheduler; they never outlive a single run.
pub struct Reaction {
    actor: ActorRef,
    task: Task,
}

impl Reaction {
    pub(crate) fn bootstrap(actor: ActorRef, body: BootstrapBody) -> Reaction {
        Reaction {
            actor,
            task: Task::Bootstrap(body),
        }
    }

    pub(crate) fn resume(actor: ActorRef, waiting: Waiting, entry: Entry) -> Reaction {
        Reaction {
            actor,
            task: Task::Resume { waiting, entry },
        }
    }

    pub fn actor(&self) -> &ActorRef {
        &self.actor
    }

    /// Runs this reaction to completion on the current thread.
    ///
    /// The worker is bound to the actor for the whole body, the handler's
    /// outcome is driven through the done/suspend/fail protocol, and a panic
    /// terminates the actor with the panic text as its exit reason.
    pub fn run(self) {
        let Reaction { actor, task } = self;
        let _binding = context::bind(actor.clone());
        actor.scheduler().tick(&actor);
        let mut ctx = Context::new(actor.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match task {
            Task::Bootstrap(body) => {
                if let Some(reason) = actor.take_pending_exit() {
                    actor.finish(reason);
                    return;
                }
                if !actor.mark_running() {
                    return;
                }
                let flow = body(&mut ctx);
                drive(&actor, &mut ctx, flow);
            }
            Task::Resume { waiting, entry } => {
                actor.push_sender(entry.sender.clone());
                let flow = waiting.resume(&mut ctx, entry);
                actor.pop_sender();
                drive(&actor, &mut ctx, flow);
            }
        }));
        if let Err(payload) = outcome {
            actor.finish(panic_reason(payload));
        }
    }
}

/// Drives a handler's outcome until the reaction either parks or ends.
fn drive(actor: &ActorRef, ctx: &mut Context, mut flow: Flow) {
    loop {
        match flow {
            Err(reason) => {
                actor.finish(reason);
                return;
            }
            Ok(Next::Done) => {
                if let Some(reason) = actor.take_pending_exit() {
                    actor.finish(reason);
                    return;
                }
                match actor.pop_chain() {
                    Some(continuation) => flow = continuation(ctx),
                    None => {
                        actor.finish(ExitReason::Normal);
                        return;
                    }
                }
            }
            Ok(Next::Suspend(waiting)) => {
                match actor.install_wait(waiting) {
                    WaitInstall::Parked => return,
                    // A matching message was already queued: resubmit rather
                    // than run inline, so each handler starts a fresh frame.
                    WaitInstall::Ready(waiting, entry) => {
                        actor
                            .scheduler()
                            .execute(Reaction::resume(actor.clone(), waiting, entry));
                        return;
                    }
                    WaitInstall::Interrupted(reason) => {
                        actor.finish(reason);
                        return;
                    }
                }
            }
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> ExitReason {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        ExitReason::abnormal(*text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        ExitReason::abnormal(text.as_str())
    } else {
        ExitReason::abnormal("handler panicked")
    }
}
