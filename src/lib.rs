//! greenroom is a library of lightweight actors running on top of a thread
//! pool.
//!
//! Each actor owns a private mailbox and talks to the world only by message
//! passing. What sets the crate apart is that waiting for a message does
//! not have to cost a thread: an actor in the green room is off stage.
//!
//! - **Thread-based waiting**: [`Context::receive`] parks the current
//!   worker until a matching message arrives. Plain, blocking, good for
//!   bodies written as straight-line code.
//! - **Event-based waiting**: [`react`] hands the scheduler a continuation
//!   (the handler to run on the next matching message) and ends the current
//!   reaction, freeing the worker. Idle actors cost memory, not threads.
//!
//! Both disciplines share one mailbox and one matching discipline: the
//! handler built from [`on`] arms is also the extraction predicate, and the
//! oldest matching message wins while non-matches keep their order.
//!
//! Actors may [`Context::link`] to each other; when one terminates, its
//! linked peers either terminate with the same reason or, with
//! [`Context::set_trap_exit`], receive the exit as an ordinary [`Exit`]
//! message.
//!
//! ```ignore
//! let stage = Stage::new();
//! let echo = stage.spawn(|_| {
//!     eventloop(on(|ctx: &mut Context, line: String| {
//!         ctx.reply(line);
//!         Ok(())
//!     }))
//! });
//! let reply = echo.ask("hello".to_string())?;
//! ```

mod actor;
mod combinators;
mod context;
mod exit;
mod links;
mod mailbox;
mod message;
mod reaction;
mod receive;
mod scheduler;

#[cfg(test)]
mod tests;

pub use crate::actor::{ActorId, ActorRef, SenderRef};
pub use crate::combinators::{choose, eventloop, loop_with, seq};
pub use crate::context::Context;
pub use crate::exit::{AskError, Exit, ExitReason};
pub use crate::mailbox::{Entry, Mailbox};
pub use crate::message::{Payload, Timeout};
pub use crate::reaction::{done, exit, react, react_within, Flow, Next, Reaction, Waiting};
pub use crate::receive::{on, on_any, on_if, Receive};
pub use crate::scheduler::{Scheduler, Stage};
