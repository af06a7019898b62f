use std::sync::Arc;

use crate::context::Context;
use crate::exit::ExitReason;
use crate::reaction::{Flow, Next, Waiting};
use crate::receive::Receive;

/// Re-executes `body` forever.
///
/// React never returns, so looping cannot be a `loop {}` around it: instead
/// a re-arming closure is pushed onto the actor's continuation chain, and
/// each time `body`'s final continuation completes, `body` is entered
/// again. Works for thread-based bodies too, where it simply re-runs them.
pub fn loop_with<F>(ctx: &mut Context, body: F) -> Flow
where
    F: Fn(&mut Context) -> Flow + Send + Sync + 'static,
{
    enter(ctx, Arc::new(body))
}

fn enter(ctx: &mut Context, body: Arc<dyn Fn(&mut Context) -> Flow + Send + Sync>) -> Flow {
    let again = body.clone();
    ctx.me().push_chain(Box::new(move |ctx| enter(ctx, again)));
    body(ctx)
}

/// Runs `first`, then `next`, where `first` may end in a react whose
/// continuation only completes much later. `next` is pushed onto the
/// continuation chain and picked up when `first`'s final continuation
/// finishes; it may itself end in a react.
pub fn seq<A, B>(ctx: &mut Context, first: A, next: B) -> Flow
where
    A: FnOnce(&mut Context) -> Flow,
    B: FnOnce(&mut Context) -> Flow + Send + 'static,
{
    ctx.me().push_chain(Box::new(next));
    first(ctx)
}

/// Waits for a message matching either alternative and dispatches to the
/// one defined on it; `a`'s arms win when both are. Usable with both
/// disciplines: `ctx.receive(choose(a, b))` or `react(choose(a, b))`.
///
/// No continuation is speculatively captured on behalf of one alternative,
/// so there is nothing to roll back when the other matches first.
pub fn choose<R>(a: Receive<R>, b: Receive<R>) -> Receive<R> {
    a.or(b)
}

/// React with a handler that re-arms itself after every invocation: the
/// "process messages forever" shape without an explicit loop. An arm ends
/// the loop by returning an exit reason (`Err(ExitReason::Normal)` stops
/// gracefully).
pub fn eventloop(handler: Receive<Result<(), ExitReason>>) -> Flow {
    Ok(Next::Suspend(Waiting::forever(handler)))
}
