use std::any::Any;

use crate::context::Context;
use crate::message::Payload;

type ArmPredicate = Box<dyn Fn(&Payload) -> bool + Send>;
type ArmBody<R> = Box<dyn FnMut(&mut Context, Payload) -> R + Send>;

struct Arm<R> {
    predicate: ArmPredicate,
    body: ArmBody<R>,
}

/// A partial message handler: an ordered list of arms, each defined on one
/// message type (optionally narrowed by a guard).
///
/// `accepts` is the predicate the mailbox scan runs; `apply` dispatches an
/// extracted message to the first arm defined on it. Compose alternatives
/// with [`Receive::or`]:
///
/// ```ignore
/// let handler = on(|_, n: u32| n + 1).or(on(|_, _: Reset| 0));
/// ```
pub struct Receive<R> {
    arms: Vec<Arm<R>>,
}

impl<R> Receive<R> {
    /// Appends `other`'s arms after this handler's own. Earlier arms win
    /// when several are defined on the same message.
    pub fn or(mut self, other: Receive<R>) -> Receive<R> {
        self.arms.extend(other.arms);
        self
    }

    /// True if any arm is defined on `msg`.
    pub fn accepts(&self, msg: &Payload) -> bool {
        self.arms.iter().any(|arm| (arm.predicate)(msg))
    }

    /// Runs the first arm defined on `msg`. Callers extract with
    /// [`Receive::accepts`] first; dispatching an unaccepted message is a
    /// bug in this crate, not in user code.
    pub(crate) fn apply(&mut self, ctx: &mut Context, msg: Payload) -> R {
        let position = self.arms.iter().position(|arm| (arm.predicate)(&msg));
        match position {
            Some(idx) => (self.arms[idx].body)(ctx, msg),
            None => unreachable!("extracted message matched no arm"),
        }
    }
}

/// One arm defined on every message of type `M`.
pub fn on<M, R, F>(mut body: F) -> Receive<R>
where
    M: Any + Send,
    F: FnMut(&mut Context, M) -> R + Send + 'static,
{
    Receive {
        arms: vec![Arm {
            predicate: Box::new(|msg| msg.is::<M>()),
            body: Box::new(move |ctx, msg| match msg.downcast::<M>() {
                Ok(msg) => body(ctx, msg),
                Err(_) => unreachable!("arm predicate admitted a foreign message"),
            }),
        }],
    }
}

/// One arm defined on messages of type `M` that also satisfy `guard`.
pub fn on_if<M, R, P, F>(guard: P, mut body: F) -> Receive<R>
where
    M: Any + Send,
    P: Fn(&M) -> bool + Send + 'static,
    F: FnMut(&mut Context, M) -> R + Send + 'static,
{
    Receive {
        arms: vec![Arm {
            predicate: Box::new(move |msg| {
                msg.downcast_ref::<M>().map_or(false, |msg| guard(msg))
            }),
            body: Box::new(move |ctx, msg| match msg.downcast::<M>() {
                Ok(msg) => body(ctx, msg),
                Err(_) => unreachable!("arm predicate admitted a foreign message"),
            }),
        }],
    }
}

/// A catch-all arm, defined on every message. Place it last.
pub fn on_any<R, F>(mut body: F) -> Receive<R>
where
    F: FnMut(&mut Context, Payload) -> R + Send + 'static,
{
    Receive {
        arms: vec![Arm {
            predicate: Box::new(|_| true),
            body: Box::new(move |ctx, msg| body(ctx, msg)),
        }],
    }
}
