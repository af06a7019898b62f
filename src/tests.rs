use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    choose, done, eventloop, exit, loop_with, on, react, react_within, seq, ActorRef, AskError,
    Context, Exit, ExitReason, Stage, Timeout,
};

#[derive(Debug, Clone, Copy)]
struct Ping;

#[derive(Debug, Clone, Copy)]
struct Pong;

#[derive(Debug, Clone, Copy)]
struct Go;

#[derive(Debug, Clone, Copy)]
struct Stop;

const LONG: Duration = Duration::from_secs(5);

#[test]
fn ping_pong_ten_rounds() {
    let stage = Stage::new();
    let ponger = stage.spawn_named("ponger", |_| {
        eventloop(
            on(|ctx: &mut Context, _: Ping| {
                ctx.reply(Pong);
                Ok(())
            })
            .or(on(|_, _: Stop| Err(ExitReason::Normal))),
        )
    });
    let peer = ponger.clone();
    let pinger = stage.spawn_named("pinger", move |ctx| {
        for _ in 0..10 {
            peer.send(Ping);
            ctx.receive(on(|_, _: Pong| ()))?;
        }
        peer.send(Stop);
        done()
    });
    assert!(stage.wait_quiescent(LONG));
    assert!(pinger.is_terminated());
    assert!(ponger.is_terminated());
    assert_eq!(pinger.exit_reason(), Some(ExitReason::Normal));
    assert_eq!(ponger.exit_reason(), Some(ExitReason::Normal));
    assert_eq!(pinger.queued(), 0);
    assert_eq!(ponger.queued(), 0);
}

#[test]
fn react_within_observes_timeout() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let started = Instant::now();
    stage.spawn(move |_| {
        react_within(
            Duration::from_millis(50),
            on(move |_, _: Timeout| {
                tx.send(started.elapsed()).unwrap();
                done()
            }),
        )
    });
    let elapsed = rx.recv_timeout(LONG).unwrap();
    assert!(elapsed >= Duration::from_millis(50), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "fired late: {:?}", elapsed);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn react_within_prefers_a_real_message() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let actor = stage.spawn(move |_| {
        react_within(
            Duration::from_millis(200),
            on(move |_, n: u32| {
                tx.send(n).unwrap();
                done()
            })
            .or(on(|_, _: Timeout| exit("unexpected timeout"))),
        )
    });
    actor.send(7u32);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 7);
    assert!(stage.wait_quiescent(LONG));
    // The timer must not have fired into the handler.
    assert_eq!(actor.exit_reason(), Some(ExitReason::Normal));
}

#[test]
fn receive_within_synthesizes_timeout() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    stage.spawn(move |ctx| {
        let started = Instant::now();
        let outcome = ctx.receive_within(
            Duration::from_millis(50),
            on(|_, n: u32| Some(n)).or(on(|_, _: Timeout| None)),
        )?;
        tx.send((outcome, started.elapsed())).unwrap();
        done()
    });
    let (outcome, elapsed) = rx.recv_timeout(LONG).unwrap();
    assert_eq!(outcome, None);
    assert!(elapsed >= Duration::from_millis(50), "woke early: {:?}", elapsed);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn receive_within_takes_a_message_in_time() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let actor = stage.spawn(move |ctx| {
        let outcome = ctx.receive_within(
            LONG,
            on(|_, n: u32| Some(n)).or(on(|_, _: Timeout| None)),
        )?;
        tx.send(outcome).unwrap();
        done()
    });
    actor.send(5u32);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), Some(5));
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn trap_exit_reifies_peer_exit_as_message() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let doomed = stage.spawn_named("doomed", |ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        exit("boom")
    });
    let peer = doomed.clone();
    let watcher = stage.spawn_named("watcher", move |ctx| {
        ctx.set_trap_exit(true);
        ctx.link(&peer);
        peer.send(Go);
        let observed = ctx.receive(on(|_, observed: Exit| observed))?;
        tx.send((observed.from.id(), observed.reason)).unwrap();
        // Still running after the peer's crash.
        ctx.receive(on(|_, _: Go| ()))?;
        done()
    });
    let (from, reason) = rx.recv_timeout(LONG).unwrap();
    assert_eq!(from, doomed.id());
    assert_eq!(reason, ExitReason::abnormal("boom"));
    assert!(!watcher.is_terminated());
    watcher.send(Go);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(watcher.exit_reason(), Some(ExitReason::Normal));
}

#[test]
fn abnormal_exit_cascades_over_links() {
    let stage = Stage::new();
    let (ready_tx, ready_rx) = flume::unbounded();
    let c = stage.spawn_named("c", |ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        exit("boom")
    });
    let linked = c.clone();
    let ready = ready_tx.clone();
    let b = stage.spawn_named("b", move |ctx| {
        ctx.link(&linked);
        ready.send(()).unwrap();
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    let linked = b.clone();
    let a = stage.spawn_named("a", move |ctx| {
        ctx.link(&linked);
        ready_tx.send(()).unwrap();
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    ready_rx.recv_timeout(LONG).unwrap();
    ready_rx.recv_timeout(LONG).unwrap();
    c.send(Go);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(c.exit_reason(), Some(ExitReason::abnormal("boom")));
    assert_eq!(b.exit_reason(), Some(ExitReason::abnormal("boom")));
    assert_eq!(a.exit_reason(), Some(ExitReason::abnormal("boom")));
}

#[test]
fn exit_propagates_once_per_peer_when_links_form_a_cycle() {
    let stage = Stage::new();
    let (probe_tx, probe_rx) = flume::unbounded();
    let (ready_tx, ready_rx) = flume::unbounded();

    let probe = probe_tx.clone();
    let a = stage.spawn_named("a", move |ctx| {
        match ctx.receive(on(|_, _: Stop| ())) {
            Ok(()) => done(),
            Err(reason) => {
                probe.send(("a", reason.clone())).unwrap();
                Err(reason)
            }
        }
    });
    let probe = probe_tx;
    let peer_a = a.clone();
    let ready = ready_tx.clone();
    let b = stage.spawn_named("b", move |ctx| {
        ctx.link(&peer_a);
        ready.send(()).unwrap();
        match ctx.receive(on(|_, _: Stop| ())) {
            Ok(()) => done(),
            Err(reason) => {
                probe.send(("b", reason.clone())).unwrap();
                Err(reason)
            }
        }
    });
    let peer_a = a.clone();
    let peer_b = b.clone();
    let c = stage.spawn_named("c", move |ctx| {
        ctx.link(&peer_a);
        ctx.link(&peer_b);
        ready_tx.send(()).unwrap();
        ctx.receive(on(|_, _: Go| ()))?;
        exit("boom")
    });
    ready_rx.recv_timeout(LONG).unwrap();
    ready_rx.recv_timeout(LONG).unwrap();
    // The triangle is closed: every member is linked to the other two.
    assert_eq!(stage.links_of(&a).len(), 2);
    assert_eq!(stage.links_of(&b).len(), 2);
    assert_eq!(stage.links_of(&c).len(), 2);
    c.send(Go);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(a.exit_reason(), Some(ExitReason::abnormal("boom")));
    assert_eq!(b.exit_reason(), Some(ExitReason::abnormal("boom")));
    assert_eq!(c.exit_reason(), Some(ExitReason::abnormal("boom")));
    let mut signaled: Vec<&'static str> = probe_rx
        .try_iter()
        .map(|(name, reason)| {
            assert_eq!(reason, ExitReason::abnormal("boom"));
            name
        })
        .collect();
    signaled.sort_unstable();
    // One exit signal per peer, even though the links close a cycle.
    assert_eq!(signaled, vec!["a", "b"]);
}

#[test]
fn normal_exit_spares_linked_peers() {
    let stage = Stage::new();
    let (ready_tx, ready_rx) = flume::unbounded();
    let c = stage.spawn_named("c", |ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        done()
    });
    let linked = c.clone();
    let ready = ready_tx.clone();
    let b = stage.spawn_named("b", move |ctx| {
        ctx.link(&linked);
        ready.send(()).unwrap();
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    let linked = b.clone();
    let a = stage.spawn_named("a", move |ctx| {
        ctx.link(&linked);
        ready_tx.send(()).unwrap();
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    ready_rx.recv_timeout(LONG).unwrap();
    ready_rx.recv_timeout(LONG).unwrap();
    c.send(Go);
    let deadline = Instant::now() + LONG;
    while !c.is_terminated() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(c.is_terminated());
    thread::sleep(Duration::from_millis(100));
    assert!(!a.is_terminated());
    assert!(!b.is_terminated());
    a.send(Stop);
    b.send(Stop);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn choose_dispatches_on_the_available_message() {
    let stage = Stage::new();
    let (tx, rx) = flume::unbounded();
    let sent_string = {
        let tx = tx.clone();
        stage.spawn(move |ctx| {
            let picked = ctx.receive(choose(on(|_, _: i32| 1), on(|_, _: String| 2)))?;
            tx.send(picked).unwrap();
            done()
        })
    };
    sent_string.send("text".to_string());
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 2);

    let sent_int = stage.spawn(move |ctx| {
        let picked = ctx.receive(choose(on(|_, _: i32| 1), on(|_, _: String| 2)))?;
        tx.send(picked).unwrap();
        done()
    });
    sent_int.send(7i32);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 1);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn choose_works_event_based() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let actor = stage.spawn(move |_| {
        react(choose(
            on(move |_, _: i32| {
                tx.send(1).unwrap();
                done()
            }),
            on(|_, _: String| done()),
        ))
    });
    actor.send(9i32);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 1);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn ask_returns_the_callee_reply() {
    let stage = Stage::new();
    let responder = stage.spawn(|_| {
        eventloop(on(|ctx: &mut Context, question: String| {
            if question == "q" {
                ctx.reply("r".to_string());
                Err(ExitReason::Normal)
            } else {
                Ok(())
            }
        }))
    });
    let reply = responder.ask("q".to_string()).unwrap();
    assert_eq!(reply.downcast::<String>().unwrap(), "r");
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn ask_to_a_terminated_actor_fails() {
    let stage = Stage::new();
    let actor = stage.spawn(|_| done());
    assert!(stage.wait_quiescent(LONG));
    match actor.ask(1u32) {
        Err(AskError::Unanswered) => {}
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn ask_within_times_out_without_a_reply() {
    let stage = Stage::new();
    let silent = stage.spawn(|ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        done()
    });
    match silent.ask_within(Duration::from_millis(100), "ignored".to_string()) {
        Err(AskError::TimedOut(_)) => {}
        other => panic!("unexpected outcome: {:?}", other),
    }
    silent.send(Go);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn per_sender_order_is_preserved() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let receiver = stage.spawn(move |ctx| {
        let mut got = Vec::new();
        for _ in 0..20 {
            got.push(ctx.receive(on(|_, n: u32| n))?);
        }
        tx.send(got).unwrap();
        done()
    });
    for n in 0..20u32 {
        receiver.send(n);
    }
    let got = rx.recv_timeout(LONG).unwrap();
    assert_eq!(got, (0..20).collect::<Vec<u32>>());
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn links_are_idempotent_and_symmetric() {
    let stage = Stage::new();
    let (tx, rx) = flume::unbounded();
    let b = stage.spawn_named("b", |ctx| {
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    let peer = b.clone();
    let a = stage.spawn_named("a", move |ctx| {
        ctx.link(&peer);
        ctx.link(&peer);
        ctx.link(&peer);
        tx.send(()).unwrap();
        ctx.receive(on(|_, _: Go| ()))?;
        ctx.unlink(&peer);
        tx.send(()).unwrap();
        ctx.receive(on(|_, _: Stop| ()))?;
        done()
    });
    rx.recv_timeout(LONG).unwrap();
    assert_eq!(stage.links_of(&a), vec![b.id()]);
    assert_eq!(stage.links_of(&b), vec![a.id()]);
    a.send(Go);
    rx.recv_timeout(LONG).unwrap();
    assert!(stage.links_of(&a).is_empty());
    assert!(stage.links_of(&b).is_empty());
    a.send(Stop);
    b.send(Stop);
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn younger_match_is_taken_while_the_older_head_stays() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let actor = stage.spawn(move |ctx| {
        // Wait until both probe messages are queued.
        ctx.receive(on(|_, _: Go| ()))?;
        let number = ctx.receive(on(|_, n: u32| n))?;
        let text = ctx.receive(on(|_, s: String| s))?;
        tx.send((number, text)).unwrap();
        done()
    });
    actor.send("older".to_string());
    actor.send(33u32);
    actor.send(Go);
    assert_eq!(
        rx.recv_timeout(LONG).unwrap(),
        (33, "older".to_string())
    );
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn a_detached_actor_counts_one_pending_reaction() {
    let stage = Stage::new();
    let actor = stage.spawn(|_| react(on(|_, _: Go| done())));
    let deadline = Instant::now() + LONG;
    while stage.pending_reactions() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(stage.pending_reactions(), 1);
    assert_eq!(stage.live_actors(), 1);
    actor.send(Go);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(stage.pending_reactions(), 0);
    assert_eq!(stage.live_actors(), 0);
}

#[test]
fn forward_preserves_the_original_sender() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let echo = stage.spawn_named("echo", |_| {
        eventloop(on(|ctx: &mut Context, _: Ping| {
            ctx.reply(Pong);
            Err(ExitReason::Normal)
        }))
    });
    let downstream = echo.clone();
    let relay = stage.spawn_named("relay", move |ctx| {
        ctx.receive(on(move |ctx: &mut Context, _: Ping| {
            ctx.forward(&downstream, Ping)
        }))?;
        done()
    });
    let upstream = relay.clone();
    stage.spawn_named("origin", move |ctx| {
        upstream.send(Ping);
        // The echo's reply lands here, not at the relay.
        ctx.receive(on(|_, _: Pong| ()))?;
        tx.send(()).unwrap();
        done()
    });
    rx.recv_timeout(LONG).unwrap();
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn seq_runs_the_second_block_after_the_first_completes() {
    let stage = Stage::new();
    let (tx, rx) = flume::unbounded();
    let second_tx = tx.clone();
    let actor = stage.spawn(move |ctx| {
        let first = {
            let tx = tx.clone();
            move |_: &mut Context| {
                react(on(move |_, n: u32| {
                    tx.send(("first", n)).unwrap();
                    done()
                }))
            }
        };
        let second = move |_: &mut Context| {
            react(on(move |_, n: u32| {
                second_tx.send(("second", n)).unwrap();
                done()
            }))
        };
        seq(ctx, first, second)
    });
    actor.send(1u32);
    actor.send(2u32);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), ("first", 1));
    assert_eq!(rx.recv_timeout(LONG).unwrap(), ("second", 2));
    assert!(stage.wait_quiescent(LONG));
}

#[test]
fn loop_reenters_its_body_until_an_exit() {
    let stage = Stage::new();
    let (tx, rx) = flume::unbounded();
    let actor = stage.spawn(move |ctx| {
        let seen = Arc::new(AtomicUsize::new(0));
        loop_with(ctx, move |_| {
            let tx = tx.clone();
            let seen = seen.clone();
            react(on(move |_, _: Ping| {
                let round = seen.fetch_add(1, Ordering::Relaxed) + 1;
                tx.send(round).unwrap();
                if round == 3 {
                    exit("normal")
                } else {
                    done()
                }
            }))
        })
    });
    actor.send(Ping);
    actor.send(Ping);
    actor.send(Ping);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 1);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 2);
    assert_eq!(rx.recv_timeout(LONG).unwrap(), 3);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(actor.exit_reason(), Some(ExitReason::Normal));
}

#[test]
fn a_panicking_handler_terminates_with_the_panic_text() {
    let stage = Stage::new();
    let actor = stage.spawn(|ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        panic!("kaboom");
    });
    actor.send(Go);
    assert!(stage.wait_quiescent(LONG));
    assert_eq!(actor.exit_reason(), Some(ExitReason::abnormal("kaboom")));
}

#[test]
fn receive_from_filters_on_the_sender() {
    let stage = Stage::new();
    let (tx, rx) = flume::bounded(1);
    let s1 = stage.spawn_named("s1", |ctx| {
        ctx.receive(on(|_, target: ActorRef| target.send("from-s1".to_string())))?;
        done()
    });
    let s2 = stage.spawn_named("s2", |ctx| {
        ctx.receive(on(|_, target: ActorRef| target.send("from-s2".to_string())))?;
        done()
    });
    let wanted = s1.clone();
    let receiver = stage.spawn_named("receiver", move |ctx| {
        ctx.receive(on(|_, _: Go| ()))?;
        let first = ctx.receive_from(&wanted, on(|_, s: String| s))?;
        let second = ctx.receive(on(|_, s: String| s))?;
        tx.send((first, second)).unwrap();
        done()
    });
    // s2's message must be the older one; queue it first and watch it land.
    s2.send(receiver.clone());
    wait_for(|| receiver.queued() >= 1);
    s1.send(receiver.clone());
    wait_for(|| receiver.queued() >= 2);
    receiver.send(Go);
    assert_eq!(
        rx.recv_timeout(LONG).unwrap(),
        ("from-s1".to_string(), "from-s2".to_string())
    );
    assert!(stage.wait_quiescent(LONG));
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + LONG;
    while !condition() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(condition(), "condition not reached within {:?}", LONG);
}
